//! Machine configuration.

use std::path::PathBuf;

use crate::tape::{RecordFormat, TapeFormat};

/// Configuration for creating a `Spectrum`.
pub struct SpectrumConfig {
    /// ROM image. Must be exactly 16,384 bytes.
    pub rom: Vec<u8>,
    /// Tape to insert at startup.
    pub tape_input_path: Option<PathBuf>,
    pub tape_input_format: Option<TapeFormat>,
    /// Recorder destination.
    pub recorder_output_path: Option<PathBuf>,
    pub recorder_output_format: Option<RecordFormat>,
    /// Beeper audio dump destination (written by the host).
    pub audio_dump_path: Option<PathBuf>,
    /// Extra tape diagnostics on stderr.
    pub tape_debug: bool,
    /// Extra beeper/ULA diagnostics on stderr.
    pub beeper_log: bool,
}

impl SpectrumConfig {
    #[must_use]
    pub fn new(rom: Vec<u8>) -> Self {
        Self {
            rom,
            tape_input_path: None,
            tape_input_format: None,
            recorder_output_path: None,
            recorder_output_format: None,
            audio_dump_path: None,
            tape_debug: false,
            beeper_log: false,
        }
    }
}
