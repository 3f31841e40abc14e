//! ZX Spectrum 48K machine.
//!
//! The CPU is cycle-accounted through the bus; the ULA port model timestamps
//! port 0xFE writes at sub-instruction resolution, which feeds the border
//! timeline, the beeper event queue, and the tape recorder. Tape playback
//! drives the EAR line read back on port 0xFE bit 6.
//!
//! Rendering and audio output are collaborators: the renderer reads VRAM and
//! the border colour, the audio callback pulls samples from the beeper
//! consumer. Neither lives in this crate.

mod beeper;
mod bus;
mod clock;
mod config;
mod error;
mod keyboard;
mod memory;
mod spectrum;
pub mod tape;
mod ula;

pub use beeper::{BeeperConsumer, BeeperState};
pub use bus::SpectrumBus;
pub use clock::Clock;
pub use config::SpectrumConfig;
pub use error::SpectrumError;
pub use keyboard::KeyboardState;
pub use memory::Memory48K;
pub use spectrum::Spectrum;
pub use tape::{RecordFormat, TapeFormat};
pub use ula::{UlaPort, UlaWrite};

/// CPU clock in Hz (3.5 MHz).
pub const CPU_HZ: u32 = 3_500_000;

/// T-states per 50 Hz PAL frame.
pub const T_STATES_PER_FRAME: u32 = 69_888;
