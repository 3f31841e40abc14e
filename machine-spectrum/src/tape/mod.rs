//! Cassette tape subsystem: formats, playback, and recording.
//!
//! TAP and TZX carry byte blocks which are rendered to pulses with the ROM
//! loader timings; WAV carries a sampled waveform converted to pulses by
//! zero-crossing. Recording runs the other way: MIC transitions become
//! pulses, then samples (WAV) or decoded bytes (TAP).

pub mod decoder;
pub mod player;
pub mod recorder;
pub mod tap;
pub mod tzx;
pub mod wav;

/// Standard pulse lengths in T-states (from the Spectrum ROM loader).
pub mod timing {
    /// Pilot pulse length.
    pub const PILOT_PULSE: u16 = 2168;

    /// Pilot pulses before a header block (flag byte 0x00).
    pub const PILOT_HEADER_PULSES: u16 = 8063;

    /// Pilot pulses before a data block.
    pub const PILOT_DATA_PULSES: u16 = 3223;

    /// First sync pulse.
    pub const SYNC1_PULSE: u16 = 667;

    /// Second sync pulse.
    pub const SYNC2_PULSE: u16 = 735;

    /// Zero-bit pulse (two per bit).
    pub const ZERO_PULSE: u16 = 855;

    /// One-bit pulse (two per bit).
    pub const ONE_PULSE: u16 = 1710;
}

/// Supported tape input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeFormat {
    Tap,
    Tzx,
    Wav,
}

/// Supported recorder output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Tap,
    Wav,
}

/// Pulse timing parameters for one data block. TAP and TZX standard-speed
/// blocks use the ROM defaults; TZX turbo blocks carry their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTimings {
    pub pilot_pulse: u16,
    /// `None` derives the count from the flag byte (8063 header, 3223 data).
    pub pilot_count: Option<u16>,
    pub sync1: u16,
    pub sync2: u16,
    pub zero_pulse: u16,
    pub one_pulse: u16,
    /// Bits used in the final byte (1-8).
    pub used_bits_last: u8,
}

impl Default for BlockTimings {
    fn default() -> Self {
        Self {
            pilot_pulse: timing::PILOT_PULSE,
            pilot_count: None,
            sync1: timing::SYNC1_PULSE,
            sync2: timing::SYNC2_PULSE,
            zero_pulse: timing::ZERO_PULSE,
            one_pulse: timing::ONE_PULSE,
            used_bits_last: 8,
        }
    }
}

/// One tape block: payload bytes plus the pause that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeBlock {
    pub data: Vec<u8>,
    pub pause_ms: u32,
    pub timings: BlockTimings,
}

impl TapeBlock {
    /// A block with standard ROM loader timings.
    #[must_use]
    pub fn standard(data: Vec<u8>, pause_ms: u32) -> Self {
        Self {
            data,
            pause_ms,
            timings: BlockTimings::default(),
        }
    }

    /// Pilot pulse count: explicit, or derived from the flag byte.
    #[must_use]
    pub fn pilot_count(&self) -> u16 {
        self.timings.pilot_count.unwrap_or({
            if self.data.first() == Some(&0x00) {
                timing::PILOT_HEADER_PULSES
            } else {
                timing::PILOT_DATA_PULSES
            }
        })
    }
}

/// An ordered pulse sequence with its starting level. Levels alternate at
/// each pulse boundary; `sample_rate` is set for WAV-sourced waveforms
/// (enabling sample-accurate seek).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    pub pulses: Vec<u32>,
    pub initial_level: bool,
    pub sample_rate: Option<u32>,
}

impl Waveform {
    /// Total duration in T-states.
    #[must_use]
    pub fn duration(&self) -> u64 {
        self.pulses.iter().map(|&p| u64::from(p)).sum()
    }
}
