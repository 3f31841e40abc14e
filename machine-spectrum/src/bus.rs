//! Spectrum bus: memory and I/O routing with T-state accounting.
//!
//! Port decoding is bit-based: any port with bit 0 clear addresses the ULA
//! regardless of the high byte. Reads sample the keyboard half-rows selected
//! by the high address byte, with bit 6 carrying the EAR input from tape
//! playback and bits 5/7 forced high. Writes are queued on the ULA with a
//! timestamp taken mid-instruction. Unclaimed reads return 0xFF.

use emu_core::{Bus, IoBus};

use crate::keyboard::KeyboardState;
use crate::memory::Memory48K;
use crate::ula::UlaPort;

#[derive(Debug)]
pub struct SpectrumBus {
    pub memory: Memory48K,
    pub ula: UlaPort,
    pub keyboard: KeyboardState,
    /// EAR override from tape playback: `Some(level)` while a tape drives
    /// the line, `None` reads as 1.
    pub tape_ear: Option<bool>,
    /// Clock value at the start of the current instruction.
    slice_base: u64,
    /// T-states consumed within the current instruction.
    slice_t: u32,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(memory: Memory48K) -> Self {
        Self {
            memory,
            ula: UlaPort::new(),
            keyboard: KeyboardState::new(),
            tape_ear: None,
            slice_base: 0,
            slice_t: 0,
        }
    }

    /// Reset the instruction time slice. Called by the machine before each
    /// CPU step (and before interrupt acceptance) with the current clock.
    pub fn begin_instruction(&mut self, now: u64) {
        self.slice_base = now;
        self.slice_t = 0;
    }
}

impl Bus for SpectrumBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.slice_t += 3;
        self.memory.read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.slice_t += 3;
        self.memory.write(addr, value);
    }

    fn tick(&mut self, t_states: u32) {
        self.slice_t += t_states;
    }

    fn elapsed(&self) -> u32 {
        self.slice_t
    }
}

impl IoBus for SpectrumBus {
    fn read_io(&mut self, port: u16) -> u8 {
        self.slice_t += 4;

        if port & 1 == 0 {
            let keys = self.keyboard.scan((port >> 8) as u8);
            let ear = match self.tape_ear {
                Some(true) | None => 0x40,
                Some(false) => 0x00,
            };
            keys | 0xA0 | ear
        } else {
            0xFF
        }
    }

    fn write_io(&mut self, port: u16, value: u8) {
        // Stamp the write with the progress made so far; the I/O cycle's
        // own 4 T-states land after the event.
        let event_t = self.slice_base + u64::from(self.slice_t);
        self.slice_t += 4;

        if port & 1 == 0 {
            self.ula.push_write(value, event_t);
        }
    }
}
