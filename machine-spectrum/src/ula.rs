//! ULA port model.
//!
//! Writes to port $FE land here with a timestamp computed from the current
//! instruction's base T-state plus the bus's progress at the moment of the
//! OUT. Binding events to sub-instruction time keeps tight beeper loops
//! accurate without cycle-exact dispatch inside every OUT.
//!
//! After each instruction the machine calls `process_events`, which applies
//! border colour changes, pushes beeper level transitions into the shared
//! event queue, and forwards MIC transitions to the tape recorder.

use std::collections::VecDeque;

use crate::beeper::BeeperState;
use crate::tape::recorder::TapeRecorder;

/// Queue capacity. A single instruction can produce at most a handful of
/// writes; 64 slots absorbs any burst between process_events calls.
const QUEUE_LEN: usize = 64;

/// One queued port $FE write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlaWrite {
    pub value: u8,
    pub t_state: u64,
}

#[derive(Debug)]
pub struct UlaPort {
    queue: VecDeque<UlaWrite>,
    /// Timestamp of the most recently queued write, for the monotonic clamp.
    last_queued_t: u64,
    border_colour: u8,
    beeper_level: u8,
    mic_level: u8,
}

impl UlaPort {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(QUEUE_LEN),
            last_queued_t: 0,
            border_colour: 0,
            beeper_level: 0,
            mic_level: 0,
        }
    }

    /// Queue a port $FE write. Timestamps are clamped forward so the queue
    /// stays monotone; on overflow the oldest entry is dropped.
    pub fn push_write(&mut self, value: u8, t_state: u64) {
        let t_state = t_state.max(self.last_queued_t);
        self.last_queued_t = t_state;

        if self.queue.len() == QUEUE_LEN {
            self.queue.pop_front();
        }
        self.queue.push_back(UlaWrite { value, t_state });
    }

    /// Apply all queued writes in order: border colour from bits 0-2, beeper
    /// level transitions from bit 4, MIC transitions from bit 3.
    pub fn process_events(&mut self, beeper: &mut BeeperState, recorder: &mut TapeRecorder) {
        while let Some(write) = self.queue.pop_front() {
            self.border_colour = write.value & 0x07;

            let new_beeper = (write.value >> 4) & 1;
            if new_beeper != self.beeper_level {
                self.beeper_level = new_beeper;
                beeper.push_event(write.t_state, new_beeper);
            }

            self.mic_level = (write.value >> 3) & 1;
            recorder.mic_event(write.t_state, self.mic_level);
        }
    }

    /// Current border colour index (0..7), for the renderer.
    #[must_use]
    pub fn border_colour(&self) -> u8 {
        self.border_colour
    }

    /// Current beeper output level.
    #[must_use]
    pub fn beeper_level(&self) -> u8 {
        self.beeper_level
    }

    /// Current MIC output level.
    #[must_use]
    pub fn mic_level(&self) -> u8 {
        self.mic_level
    }

    /// Queued writes not yet processed (diagnostics).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Default for UlaPort {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::RecordFormat;
    use crate::CPU_HZ;

    fn make_parts() -> (UlaPort, BeeperState, TapeRecorder) {
        let mut recorder = TapeRecorder::new(RecordFormat::Wav, 44_100);
        recorder.set_output(std::env::temp_dir().join("machine-spectrum-ula.wav"));
        (UlaPort::new(), BeeperState::new(CPU_HZ, 44_100), recorder)
    }

    #[test]
    fn border_from_low_bits() {
        let (mut ula, mut beeper, mut recorder) = make_parts();
        ula.push_write(0x07, 10);
        ula.process_events(&mut beeper, &mut recorder);
        assert_eq!(ula.border_colour(), 7);

        ula.push_write(0x12, 20);
        ula.process_events(&mut beeper, &mut recorder);
        assert_eq!(ula.border_colour(), 2);
    }

    #[test]
    fn beeper_events_only_on_level_change() {
        let (mut ula, mut beeper, mut recorder) = make_parts();

        ula.push_write(0x10, 100);
        ula.push_write(0x10, 150); // same level: no second event
        ula.push_write(0x00, 200);
        ula.process_events(&mut beeper, &mut recorder);

        assert_eq!(beeper.pending(), vec![(100, 1), (200, 0)]);
    }

    #[test]
    fn timestamps_clamped_monotone() {
        let (mut ula, mut beeper, mut recorder) = make_parts();

        ula.push_write(0x10, 500);
        ula.push_write(0x00, 400); // earlier timestamp clamps forward
        ula.process_events(&mut beeper, &mut recorder);

        assert_eq!(beeper.pending(), vec![(500, 1), (500, 0)]);
    }

    #[test]
    fn overflow_drops_oldest() {
        let (mut ula, mut beeper, mut recorder) = make_parts();
        for i in 0..(QUEUE_LEN as u64 + 8) {
            ula.push_write((i & 7) as u8, i);
        }
        assert_eq!(ula.pending(), QUEUE_LEN);
        ula.process_events(&mut beeper, &mut recorder);
        // Last write wins the border
        assert_eq!(ula.border_colour(), ((QUEUE_LEN as u64 + 7) & 7) as u8);
    }

    #[test]
    fn mic_transitions_reach_the_recorder() {
        let (mut ula, mut beeper, mut recorder) = make_parts();
        recorder.start(false, 0).expect("record start");

        ula.push_write(0x08, 1_000);
        ula.push_write(0x00, 18_500);
        ula.process_events(&mut beeper, &mut recorder);

        assert_eq!(ula.mic_level(), 0);
        assert!(recorder.block_active(), "MIC activity opened a block");
    }
}
