//! Tape playback: drives the EAR line from a pulse timeline.
//!
//! Two source shapes share one transition ratchet. Block sources (TAP/TZX)
//! run a phase machine — Pilot, Sync1, Sync2, Data, Pause — generating
//! pulses lazily with the block's timings; waveform sources (WAV) walk a
//! prerendered pulse list. `update(now)` consumes the T-states elapsed
//! since the last call and toggles the level at each pulse boundary.

#![allow(clippy::cast_possible_truncation)]

use crate::tape::{TapeBlock, Waveform};
use crate::CPU_HZ;

/// Playback phase for block-mode sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pilot,
    Sync1,
    Sync2,
    Data,
    Pause,
    Done,
}

#[derive(Debug)]
enum Source {
    Blocks(Vec<TapeBlock>),
    Waveform(Waveform),
}

#[derive(Debug)]
pub struct TapePlayer {
    source: Source,
    playing: bool,
    started: bool,
    level: bool,
    /// Clock value at the previous `update`.
    last_now: u64,
    /// T-states until the next level transition.
    countdown: u64,
    /// Cumulative T-states since head zero.
    position_tstates: u64,

    // Block-mode cursor
    phase: Phase,
    block_index: usize,
    byte_index: usize,
    bit_mask: u8,
    bits_left: u8,
    second_half: bool,
    pilot_remaining: u16,

    // Waveform cursor
    pulse_index: usize,
}

impl TapePlayer {
    /// A player over a block list (TAP or TZX).
    #[must_use]
    pub fn from_blocks(blocks: Vec<TapeBlock>) -> Self {
        Self::new(Source::Blocks(blocks))
    }

    /// A player over a prerendered waveform (WAV).
    #[must_use]
    pub fn from_waveform(waveform: Waveform) -> Self {
        Self::new(Source::Waveform(waveform))
    }

    fn new(source: Source) -> Self {
        Self {
            source,
            playing: false,
            started: false,
            level: false,
            last_now: 0,
            countdown: 0,
            position_tstates: 0,
            phase: Phase::Idle,
            block_index: 0,
            byte_index: 0,
            bit_mask: 0,
            bits_left: 0,
            second_half: false,
            pilot_remaining: 0,
            pulse_index: 0,
        }
    }

    /// Begin playback from the current head position.
    pub fn start(&mut self, now: u64) {
        if !self.started {
            self.rewind();
            match &self.source {
                Source::Waveform(waveform) => {
                    if let Some(&first) = waveform.pulses.first() {
                        self.countdown = u64::from(first);
                    } else {
                        self.phase = Phase::Done;
                    }
                }
                Source::Blocks(_) => self.enter_block(),
            }
            self.started = true;
        }
        if self.phase != Phase::Done {
            self.playing = true;
        }
        self.last_now = now;
    }

    /// Pause, retaining the remaining time to the next transition.
    pub fn pause(&mut self, now: u64) {
        self.update(now);
        self.playing = false;
    }

    /// Resume after a pause. `pause` then `resume` at the same instant is a
    /// no-op.
    pub fn resume(&mut self, now: u64) {
        if self.started && self.phase != Phase::Done {
            self.playing = true;
        }
        self.last_now = now;
    }

    /// Rewind to the start of the tape.
    pub fn rewind(&mut self) {
        self.playing = false;
        self.started = false;
        self.level = false;
        self.countdown = 0;
        self.position_tstates = 0;
        self.phase = Phase::Idle;
        self.block_index = 0;
        self.byte_index = 0;
        self.bit_mask = 0;
        self.bits_left = 0;
        self.second_half = false;
        self.pilot_remaining = 0;
        self.pulse_index = 0;
        if let Source::Waveform(waveform) = &self.source {
            self.level = waveform.initial_level;
        }
    }

    /// Seek to an absolute T-state position. Waveform sources only: block
    /// sources have no sample-accurate timeline.
    ///
    /// # Errors
    ///
    /// Returns a message for block-mode tapes.
    pub fn seek(&mut self, t: u64) -> Result<(), String> {
        let Source::Waveform(waveform) = &self.source else {
            return Err("seek is only supported for WAV tapes".to_string());
        };

        let mut cumulative: u64 = 0;
        let mut index = 0;
        for &pulse in &waveform.pulses {
            let end = cumulative + u64::from(pulse);
            if t < end {
                self.pulse_index = index;
                self.level = waveform.initial_level ^ (index % 2 == 1);
                self.countdown = end - t;
                self.position_tstates = t;
                self.phase = Phase::Idle;
                self.started = true;
                return Ok(());
            }
            cumulative = end;
            index += 1;
        }

        // Past the end
        self.pulse_index = waveform.pulses.len();
        self.position_tstates = cumulative;
        self.phase = Phase::Done;
        self.playing = false;
        Ok(())
    }

    /// Advance playback to `now`, toggling the level at each transition.
    pub fn update(&mut self, now: u64) {
        if !self.playing {
            self.last_now = now;
            return;
        }

        let mut dt = now.saturating_sub(self.last_now);
        self.last_now = now;
        self.position_tstates += dt;

        while self.playing && dt >= self.countdown {
            dt -= self.countdown;
            self.countdown = 0;
            self.transition();
        }
        if self.playing {
            self.countdown -= dt;
        }
    }

    /// EAR line driven by the tape: `Some(level)` while playing.
    #[must_use]
    pub fn ear(&self) -> Option<bool> {
        if self.playing {
            Some(self.level)
        } else {
            None
        }
    }

    /// Current output level.
    #[must_use]
    pub fn level(&self) -> bool {
        self.level
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether the tape has run out.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Current playback phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Cumulative T-states since head zero.
    #[must_use]
    pub fn position_tstates(&self) -> u64 {
        self.position_tstates
    }

    /// Head position in samples, for WAV sources.
    #[must_use]
    pub fn position_samples(&self) -> Option<u64> {
        match &self.source {
            Source::Waveform(Waveform {
                sample_rate: Some(rate),
                ..
            }) => Some(self.position_tstates * u64::from(*rate) / u64::from(CPU_HZ)),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Transition machinery
    // -----------------------------------------------------------------------

    /// A pulse boundary: toggle (where the phase calls for it) and load the
    /// next pulse's duration into the countdown.
    fn transition(&mut self) {
        match &self.source {
            Source::Waveform(_) => self.waveform_transition(),
            Source::Blocks(_) => self.block_transition(),
        }
    }

    fn waveform_transition(&mut self) {
        let Source::Waveform(waveform) = &self.source else {
            return;
        };
        self.level = !self.level;
        self.pulse_index += 1;
        match waveform.pulses.get(self.pulse_index) {
            Some(&next) => self.countdown = u64::from(next),
            None => {
                self.phase = Phase::Done;
                self.playing = false;
            }
        }
    }

    fn block_transition(&mut self) {
        match self.phase {
            Phase::Idle => self.enter_block(),
            Phase::Pilot => {
                self.level = !self.level;
                self.pilot_remaining -= 1;
                if self.pilot_remaining == 0 {
                    self.phase = Phase::Sync1;
                    self.countdown = u64::from(self.current_timings().sync1);
                } else {
                    self.countdown = u64::from(self.current_timings().pilot_pulse);
                }
            }
            Phase::Sync1 => {
                self.level = !self.level;
                self.phase = Phase::Sync2;
                self.countdown = u64::from(self.current_timings().sync2);
            }
            Phase::Sync2 => {
                self.level = !self.level;
                self.phase = Phase::Data;
                self.byte_index = 0;
                self.load_byte();
                self.second_half = false;
                self.countdown = self.current_bit_duration();
            }
            Phase::Data => {
                self.level = !self.level;
                if !self.second_half {
                    self.second_half = true;
                    self.countdown = self.current_bit_duration();
                } else {
                    self.second_half = false;
                    self.advance_bit();
                }
            }
            Phase::Pause => {
                // The pause holds the level; no toggle
                self.enter_block();
            }
            Phase::Done => {
                self.playing = false;
            }
        }
    }

    fn current_block(&self) -> &TapeBlock {
        let Source::Blocks(blocks) = &self.source else {
            unreachable!("block cursor on a waveform source")
        };
        &blocks[self.block_index]
    }

    fn current_timings(&self) -> crate::tape::BlockTimings {
        self.current_block().timings
    }

    /// Start the next block, or finish the tape.
    fn enter_block(&mut self) {
        let Source::Blocks(blocks) = &self.source else {
            return;
        };
        let Some(block) = blocks.get(self.block_index) else {
            self.phase = Phase::Done;
            self.playing = false;
            return;
        };

        if block.data.is_empty() {
            self.block_index += 1;
            self.start_pause();
            return;
        }

        self.pilot_remaining = block.pilot_count();
        if self.pilot_remaining == 0 {
            self.phase = Phase::Sync1;
            self.countdown = u64::from(block.timings.sync1);
        } else {
            self.phase = Phase::Pilot;
            self.countdown = u64::from(block.timings.pilot_pulse);
        }
    }

    /// Set the bit cursor for the byte at `byte_index`.
    fn load_byte(&mut self) {
        let block = self.current_block();
        self.bits_left = if self.byte_index == block.data.len() - 1 {
            block.timings.used_bits_last
        } else {
            8
        };
        self.bit_mask = 0x80;
    }

    fn current_bit_duration(&self) -> u64 {
        let block = self.current_block();
        let bit = block.data[self.byte_index] & self.bit_mask != 0;
        u64::from(if bit {
            block.timings.one_pulse
        } else {
            block.timings.zero_pulse
        })
    }

    /// Move past the bit just finished; step to the next byte, or into the
    /// block's trailing pause.
    fn advance_bit(&mut self) {
        self.bits_left -= 1;
        self.bit_mask >>= 1;

        if self.bits_left == 0 {
            self.byte_index += 1;
            if self.byte_index == self.current_block().data.len() {
                self.block_index += 1;
                self.start_pause();
                return;
            }
            self.load_byte();
        }
        self.countdown = self.current_bit_duration();
    }

    /// Enter the pause that trails the block just finished (`block_index`
    /// already points past it), or go straight to the next block.
    fn start_pause(&mut self) {
        let Source::Blocks(blocks) = &self.source else {
            return;
        };
        let pause_ms = blocks
            .get(self.block_index.wrapping_sub(1))
            .map_or(0, |b| b.pause_ms);

        if pause_ms == 0 {
            self.phase = Phase::Idle;
            self.countdown = 0;
            // Delegate to the next boundary immediately
            self.enter_block();
        } else {
            self.phase = Phase::Pause;
            self.countdown = u64::from(pause_ms) * u64::from(CPU_HZ / 1000);
        }
    }
}

/// Render a block list to its complete pulse waveform with the standard
/// two-pulses-per-bit encoding. Each block's trailing pause extends the
/// following pulse (the level carries through the gap); a pause after the
/// final block becomes a terminating pulse of its own.
#[must_use]
pub fn synthesize_blocks(blocks: &[TapeBlock]) -> Waveform {
    fn push(pulses: &mut Vec<u32>, pending: &mut u32, duration: u32) {
        pulses.push(duration + std::mem::take(pending));
    }

    let mut pulses: Vec<u32> = Vec::new();
    let mut pending_pause: u32 = 0;

    for block in blocks {
        if block.data.is_empty() {
            pending_pause += block.pause_ms * (CPU_HZ / 1000);
            continue;
        }
        let t = block.timings;

        for _ in 0..block.pilot_count() {
            push(&mut pulses, &mut pending_pause, u32::from(t.pilot_pulse));
        }
        push(&mut pulses, &mut pending_pause, u32::from(t.sync1));
        push(&mut pulses, &mut pending_pause, u32::from(t.sync2));

        for (i, &byte) in block.data.iter().enumerate() {
            let bits = if i == block.data.len() - 1 {
                t.used_bits_last
            } else {
                8
            };
            for bit in 0..bits {
                let set = byte & (0x80 >> bit) != 0;
                let duration = u32::from(if set { t.one_pulse } else { t.zero_pulse });
                push(&mut pulses, &mut pending_pause, duration);
                push(&mut pulses, &mut pending_pause, duration);
            }
        }

        pending_pause += block.pause_ms * (CPU_HZ / 1000);
    }

    if pending_pause > 0 {
        pulses.push(pending_pause);
    }

    Waveform {
        pulses,
        initial_level: false,
        sample_rate: None,
    }
}
