//! Beeper pipeline: sparse level transitions at CPU rate in, PCM out.
//!
//! The producer (ULA, main thread) enqueues timestamped level changes; the
//! consumer (audio callback thread) resamples them to the host rate with a
//! one-pole DC-blocking filter. The shared state sits behind a mutex held
//! only for the duration of an enqueue or a fill — the audio-lock idiom.
//!
//! Backpressure is asymmetric: the producer drops its oldest event on
//! overflow (the audio thread is higher priority than history), and the main
//! loop polls `latency_samples()` to throttle itself when it runs ahead.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Event ring capacity.
const QUEUE_LEN: usize = 8192;

/// Output amplitude for a high level; low is the negative.
const AMPLITUDE: f64 = 2000.0;

/// DC-blocking filter coefficient.
const DC_ALPHA: f64 = 0.995;

/// Timestamps this many samples behind the playback position are treated as
/// a rewind and trigger a resync; smaller reorders are absorbed.
const REWIND_TOLERANCE_SAMPLES: f64 = 8.0;

/// After this many consecutive samples with an empty queue the consumer
/// emits true silence instead of the decayed filter output.
const IDLE_SILENCE_SAMPLES: u32 = 512;

#[derive(Debug)]
struct Shared {
    events: VecDeque<(u64, u8)>,
    /// Level as of the last consumed event.
    level: u8,
    /// Consumer position on the T-state axis.
    playback_position: f64,
    /// High-water mark of enqueued timestamps.
    writer_cursor: u64,
    // DC-blocker state
    x_prev: f64,
    y_prev: f64,
    idle_samples: u32,
}

/// Producer half, owned by the machine.
#[derive(Debug)]
pub struct BeeperState {
    shared: Arc<Mutex<Shared>>,
    cycles_per_sample: f64,
}

/// Consumer half, cloned into the audio callback.
pub struct BeeperConsumer {
    shared: Arc<Mutex<Shared>>,
    cycles_per_sample: f64,
}

impl BeeperState {
    #[must_use]
    pub fn new(cpu_hz: u32, sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                events: VecDeque::with_capacity(QUEUE_LEN),
                level: 0,
                playback_position: 0.0,
                writer_cursor: 0,
                x_prev: -AMPLITUDE,
                y_prev: 0.0,
                idle_samples: 0,
            })),
            cycles_per_sample: f64::from(cpu_hz) / f64::from(sample_rate),
        }
    }

    /// Enqueue a level transition at the given T-state.
    pub fn push_event(&mut self, t_state: u64, level: u8) {
        let mut s = self.shared.lock().expect("beeper lock");

        // A timestamp far behind the consumer means the time base moved
        // (tape rewind, machine reset): flush and re-seat the pipeline.
        let tolerance = REWIND_TOLERANCE_SAMPLES * self.cycles_per_sample;
        if (t_state as f64) + tolerance < s.playback_position {
            s.events.clear();
            s.playback_position = t_state as f64;
            s.writer_cursor = t_state;
            s.level = level;
            s.x_prev = if level == 1 { AMPLITUDE } else { -AMPLITUDE };
            s.y_prev = 0.0;
        }

        if s.events.len() == QUEUE_LEN {
            // Drop the oldest, but let its level take effect so the
            // remaining history stays consistent.
            if let Some((_, dropped_level)) = s.events.pop_front() {
                s.level = dropped_level;
            }
        }

        s.events.push_back((t_state, level));
        s.writer_cursor = s.writer_cursor.max(t_state);
        s.idle_samples = 0;
    }

    /// How far the producer has run ahead of the consumer, in output
    /// samples. The main loop sleeps when this exceeds its threshold.
    #[must_use]
    pub fn latency_samples(&self) -> f64 {
        let s = self.shared.lock().expect("beeper lock");
        ((s.writer_cursor as f64) - s.playback_position).max(0.0) / self.cycles_per_sample
    }

    /// A consumer handle for the audio callback.
    #[must_use]
    pub fn consumer(&self) -> BeeperConsumer {
        BeeperConsumer {
            shared: Arc::clone(&self.shared),
            cycles_per_sample: self.cycles_per_sample,
        }
    }

    /// Snapshot of undrained events (tests and diagnostics).
    #[must_use]
    pub fn pending(&self) -> Vec<(u64, u8)> {
        let s = self.shared.lock().expect("beeper lock");
        s.events.iter().copied().collect()
    }
}

impl BeeperConsumer {
    /// Produce `out.len()` mono samples, advancing the playback position by
    /// one sample interval each.
    pub fn fill(&self, out: &mut [i16]) {
        let mut s = self.shared.lock().expect("beeper lock");

        for sample in out.iter_mut() {
            let t_next = s.playback_position + self.cycles_per_sample;

            while let Some(&(t, level)) = s.events.front() {
                if (t as f64) <= t_next {
                    s.events.pop_front();
                    s.level = level;
                } else {
                    break;
                }
            }

            if s.events.is_empty() {
                s.idle_samples = s.idle_samples.saturating_add(1);
            } else {
                s.idle_samples = 0;
            }

            if s.idle_samples >= IDLE_SILENCE_SAMPLES {
                *sample = 0;
                s.playback_position = t_next;
                continue;
            }

            let raw = if s.level == 1 { AMPLITUDE } else { -AMPLITUDE };
            let y = raw - s.x_prev + DC_ALPHA * s.y_prev;
            s.x_prev = raw;
            s.y_prev = y;
            *sample = y.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;

            s.playback_position = t_next;
        }
    }
}
