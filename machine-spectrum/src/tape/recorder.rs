//! Tape recorder: captures MIC transitions and writes TAP or WAV.
//!
//! MIC activity opens a block; each level change closes a pulse. A block
//! finalizes when the line goes quiet for ~0.1 s (or on a forced flush):
//! the pulses are rendered to samples, and for TAP output a block long
//! enough to look like real data is run through the pulse decoder. The
//! captured session is written out when recording stops.

use std::path::PathBuf;

use crate::error::SpectrumError;
use crate::tape::{decoder, tap, wav, RecordFormat, TapeBlock};
use crate::CPU_HZ;

/// Idle gap that finalizes a block (~0.1 s of silence).
const BLOCK_IDLE_TSTATES: u64 = 350_000;

/// Blocks with fewer pulses than this are noise, not data; they are kept in
/// the audio capture but never offered to the TAP decoder.
const MIN_DECODE_PULSES: usize = 100;

/// Sample amplitude for a high MIC level.
const AMPLITUDE: i16 = 2000;

/// Pause stored on decoded TAP blocks.
const DECODED_PAUSE_MS: u32 = 1000;

#[derive(Debug)]
pub struct TapeRecorder {
    format: RecordFormat,
    sample_rate: u32,
    output_path: Option<PathBuf>,
    debug: bool,

    recording: bool,
    /// Captured-but-unwritten data exists.
    dirty: bool,
    /// Shift-record: grow the existing file instead of overwriting.
    append: bool,

    // Current block capture
    block_active: bool,
    block_start_level: u8,
    last_level: u8,
    last_transition_t: u64,
    pulses: Vec<u32>,

    // Session output
    samples: Vec<i16>,
    blocks: Vec<TapeBlock>,
}

impl TapeRecorder {
    #[must_use]
    pub fn new(format: RecordFormat, sample_rate: u32) -> Self {
        Self {
            format,
            sample_rate,
            output_path: None,
            debug: false,
            recording: false,
            dirty: false,
            append: false,
            block_active: false,
            block_start_level: 0,
            last_level: 0,
            last_transition_t: 0,
            pulses: Vec::new(),
            samples: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn set_output(&mut self, path: PathBuf) {
        self.output_path = Some(path);
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    #[must_use]
    pub fn block_active(&self) -> bool {
        self.block_active
    }

    /// Captured samples so far (including any preserved prefix).
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Blocks recovered by the TAP decoder so far.
    #[must_use]
    pub fn decoded_blocks(&self) -> &[TapeBlock] {
        &self.blocks
    }

    /// Begin a recording session.
    ///
    /// A normal start clears any previous capture; for a WAV destination it
    /// additionally preserves the existing file up to `head_samples` so the
    /// recording overwrites from the current tape counter. A shift-record
    /// start (`append`) leaves the existing file intact and grows it.
    ///
    /// # Errors
    ///
    /// `TapeStateConflict` when no output is configured, when append is
    /// requested on a non-WAV destination, or when already recording.
    pub fn start(&mut self, append: bool, head_samples: usize) -> Result<(), SpectrumError> {
        if self.recording {
            return Err(SpectrumError::TapeStateConflict(
                "already recording".to_string(),
            ));
        }
        let Some(path) = self.output_path.clone() else {
            return Err(SpectrumError::TapeStateConflict(
                "no recorder output configured".to_string(),
            ));
        };
        if append && self.format != RecordFormat::Wav {
            return Err(SpectrumError::TapeStateConflict(
                "append recording requires a WAV destination".to_string(),
            ));
        }

        self.samples.clear();
        self.blocks.clear();
        self.pulses.clear();
        self.block_active = false;
        self.append = append;

        if !append && self.format == RecordFormat::Wav && head_samples > 0 && path.exists() {
            let (mut existing, rate) =
                wav::read_samples(&path).map_err(SpectrumError::TapeParse)?;
            if rate != self.sample_rate {
                return Err(SpectrumError::TapeStateConflict(format!(
                    "existing WAV is {rate} Hz, recorder is {} Hz",
                    self.sample_rate
                )));
            }
            existing.truncate(head_samples);
            self.samples = existing;
        }

        self.recording = true;
        Ok(())
    }

    /// A MIC transition from the ULA.
    pub fn mic_event(&mut self, t_state: u64, level: u8) {
        if !self.recording {
            return;
        }

        if !self.block_active {
            self.block_active = true;
            self.block_start_level = level;
            self.last_level = level;
            self.last_transition_t = t_state;
            if self.debug {
                eprintln!("tape: record block opened at T={t_state}");
            }
            return;
        }

        if level == self.last_level {
            return;
        }

        self.pulses
            .push(t_state.saturating_sub(self.last_transition_t) as u32);
        self.last_level = level;
        self.last_transition_t = t_state;
    }

    /// Finalize the current block once the line has idled past the
    /// threshold, or unconditionally when `force` is set.
    pub fn update(&mut self, now: u64, force: bool) {
        if !self.block_active {
            return;
        }
        let idle = now.saturating_sub(self.last_transition_t);
        if force || idle >= BLOCK_IDLE_TSTATES {
            self.finalize_block(now);
        }
    }

    /// Stop recording and write the session out.
    ///
    /// # Errors
    ///
    /// `TapeIo`/`TapeParse` for write failures; the output file keeps its
    /// previous content when the write never started.
    pub fn stop(&mut self, now: u64) -> Result<(), SpectrumError> {
        if self.recording {
            self.update(now, true);
            self.recording = false;
        }
        if self.dirty {
            self.write_out()?;
            self.dirty = false;
        }
        Ok(())
    }

    fn finalize_block(&mut self, now: u64) {
        if self.pulses.is_empty() {
            // A lone transition with no pulses: nothing to keep
            self.block_active = false;
            return;
        }

        // Audio rendering: one run per pulse from the block start level,
        // then the idle tail held at the final level
        let mut level = self.block_start_level;
        let pulse_count = self.pulses.len();
        for i in 0..pulse_count {
            let pulse = self.pulses[i];
            self.push_level_samples(level, u64::from(pulse));
            level ^= 1;
        }
        let idle = now.saturating_sub(self.last_transition_t);
        self.push_level_samples(self.last_level, idle);

        if self.format == RecordFormat::Tap {
            if pulse_count >= MIN_DECODE_PULSES {
                match decoder::decode_pulses(&self.pulses) {
                    Ok(bytes) => {
                        if self.debug {
                            eprintln!("tape: decoded {} byte block", bytes.len());
                        }
                        self.blocks
                            .push(TapeBlock::standard(bytes, DECODED_PAUSE_MS));
                    }
                    Err(message) => {
                        eprintln!("tape: dropping undecodable block: {message}");
                    }
                }
            } else if self.debug {
                eprintln!("tape: ignoring {pulse_count}-pulse noise block");
            }
        }

        self.pulses.clear();
        self.block_active = false;
        self.dirty = true;
    }

    fn push_level_samples(&mut self, level: u8, duration_tstates: u64) {
        let count = duration_tstates * u64::from(self.sample_rate) / u64::from(CPU_HZ);
        let value = if level == 1 { AMPLITUDE } else { -AMPLITUDE };
        self.samples
            .extend(std::iter::repeat(value).take(count as usize));
    }

    fn write_out(&mut self) -> Result<(), SpectrumError> {
        let Some(path) = self.output_path.clone() else {
            return Ok(());
        };

        match self.format {
            RecordFormat::Tap => {
                let image = tap::serialize(&self.blocks);
                std::fs::write(&path, image).map_err(|source| SpectrumError::TapeIo {
                    path: path.clone(),
                    source,
                })?;
                eprintln!(
                    "tape: wrote {} block(s) to {}",
                    self.blocks.len(),
                    path.display()
                );
            }
            RecordFormat::Wav => {
                if self.append {
                    wav::append_samples(&path, &self.samples, self.sample_rate)
                        .map_err(SpectrumError::TapeParse)?;
                } else {
                    wav::write_samples(&path, &self.samples, self.sample_rate)
                        .map_err(SpectrumError::TapeParse)?;
                }
                eprintln!(
                    "tape: wrote {} sample(s) to {}",
                    self.samples.len(),
                    path.display()
                );
            }
        }
        Ok(())
    }
}
