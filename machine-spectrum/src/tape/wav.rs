//! WAV tape I/O.
//!
//! Loading accepts mono 8- or 16-bit integer PCM and converts the sample
//! stream to pulses by sign runs. Saving writes 16-bit mono PCM; appending
//! reuses the existing file's header after validating that its format
//! matches, with hound patching the RIFF and data chunk sizes on finalize.

use std::io;
use std::path::Path;

use crate::tape::Waveform;
use crate::CPU_HZ;

/// Decode a WAV stream into a pulse waveform.
///
/// Each run of same-sign samples becomes one pulse of
/// `round(run_length × CPU_HZ / sample_rate)` T-states (minimum 1); the
/// first sample's sign sets the initial level.
///
/// # Errors
///
/// Returns a message for non-PCM, non-mono, or unsupported bit depths.
pub fn decode_waveform<R: io::Read>(reader: R) -> Result<Waveform, String> {
    let mut wav = hound::WavReader::new(reader).map_err(|e| format!("bad WAV: {e}"))?;
    let spec = wav.spec();

    if spec.sample_format != hound::SampleFormat::Int {
        return Err("unsupported WAV: only integer PCM is accepted".to_string());
    }
    if spec.channels != 1 {
        return Err(format!(
            "unsupported WAV: {} channels, only mono is accepted",
            spec.channels
        ));
    }
    if spec.bits_per_sample != 8 && spec.bits_per_sample != 16 {
        return Err(format!(
            "unsupported WAV: {}-bit samples, only 8 or 16 accepted",
            spec.bits_per_sample
        ));
    }

    let tstates_per_sample = f64::from(CPU_HZ) / f64::from(spec.sample_rate);
    let mut pulses = Vec::new();
    let mut initial_level = false;
    let mut run_level = false;
    let mut run_length: u64 = 0;
    let mut any = false;

    for sample in wav.samples::<i16>() {
        let sample = sample.map_err(|e| format!("bad WAV data: {e}"))?;
        let level = sample >= 0;
        if !any {
            any = true;
            initial_level = level;
            run_level = level;
        }
        if level == run_level {
            run_length += 1;
        } else {
            pulses.push(run_to_pulse(run_length, tstates_per_sample));
            run_level = level;
            run_length = 1;
        }
    }
    if run_length > 0 {
        pulses.push(run_to_pulse(run_length, tstates_per_sample));
    }

    Ok(Waveform {
        pulses,
        initial_level,
        sample_rate: Some(spec.sample_rate),
    })
}

fn run_to_pulse(run_length: u64, tstates_per_sample: f64) -> u32 {
    let duration = (run_length as f64 * tstates_per_sample).round() as u32;
    duration.max(1)
}

/// Load a waveform from a WAV file.
///
/// # Errors
///
/// I/O failures and format problems are both reported as messages; the
/// caller wraps them into the machine error kinds.
pub fn load_waveform(path: &Path) -> Result<Waveform, String> {
    let file = std::fs::File::open(path).map_err(|e| format!("open: {e}"))?;
    decode_waveform(io::BufReader::new(file))
}

/// Read all samples (and the sample rate) from an existing 16-bit mono WAV.
/// Used to preserve a prefix when recording overwrites from mid-tape.
pub fn read_samples(path: &Path) -> Result<(Vec<i16>, u32), String> {
    let mut wav = hound::WavReader::open(path).map_err(|e| format!("open: {e}"))?;
    let spec = wav.spec();
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err("existing WAV is not 16-bit mono PCM".to_string());
    }
    let samples: Result<Vec<i16>, _> = wav.samples::<i16>().collect();
    let samples = samples.map_err(|e| format!("bad WAV data: {e}"))?;
    Ok((samples, spec.sample_rate))
}

/// Write samples as a fresh 16-bit mono PCM file.
///
/// # Errors
///
/// Reports creation or write failures as messages.
pub fn write_samples(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), String> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| format!("create: {e}"))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| format!("write: {e}"))?;
    }
    writer.finalize().map_err(|e| format!("finalize: {e}"))
}

/// Append samples to an existing WAV, validating format equivalence. The
/// RIFF and data chunk sizes are patched when the writer finalizes.
///
/// # Errors
///
/// Reports a format mismatch or write failure as a message.
pub fn append_samples(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), String> {
    let mut writer = hound::WavWriter::append(path).map_err(|e| format!("append: {e}"))?;
    let spec = writer.spec();
    if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
        || spec.sample_rate != sample_rate
    {
        return Err(format!(
            "existing WAV format mismatch: {} ch, {}-bit, {} Hz",
            spec.channels, spec.bits_per_sample, spec.sample_rate
        ));
    }
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| format!("write: {e}"))?;
    }
    writer.finalize().map_err(|e| format!("finalize: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn alternating_runs_become_pulses() {
        // Runs of 5 samples at ±8000, 44100 Hz
        let mut samples = Vec::new();
        for run in 0..6 {
            let value = if run % 2 == 0 { 8000i16 } else { -8000 };
            samples.extend(std::iter::repeat(value).take(5));
        }
        let wav = encode_wav(&samples, 44_100);

        let waveform = decode_waveform(Cursor::new(wav)).expect("decodes");
        assert!(waveform.initial_level);
        assert_eq!(waveform.sample_rate, Some(44_100));
        assert_eq!(waveform.pulses.len(), 6);

        let expected = (5.0 * 3_500_000.0 / 44_100.0_f64).round() as u32;
        for &pulse in &waveform.pulses {
            assert_eq!(pulse, expected);
        }
    }

    #[test]
    fn first_sample_sign_sets_initial_level() {
        let wav = encode_wav(&[-100, -100, 100], 44_100);
        let waveform = decode_waveform(Cursor::new(wav)).expect("decodes");
        assert!(!waveform.initial_level);
        assert_eq!(waveform.pulses.len(), 2);
    }

    #[test]
    fn single_sample_run_is_at_least_one_tstate() {
        // At an absurdly low T-states-per-sample ratio the rounding floor
        // of 1 still applies
        let wav = encode_wav(&[100], 8_000_000);
        let waveform = decode_waveform(Cursor::new(wav)).expect("decodes");
        assert_eq!(waveform.pulses, vec![1]);
    }

    #[test]
    fn stereo_rejected_with_clear_message() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(1i16).unwrap();
            writer.write_sample(1i16).unwrap();
            writer.finalize().unwrap();
        }
        let err = decode_waveform(Cursor::new(cursor.into_inner())).unwrap_err();
        assert!(err.contains("mono"), "{err}");
    }

    #[test]
    fn garbage_rejected() {
        assert!(decode_waveform(Cursor::new(b"not a wav".to_vec())).is_err());
    }

    #[test]
    fn append_grows_data_chunk_and_patches_sizes() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("machine-spectrum-append-{}.wav", std::process::id()));

        write_samples(&path, &[1, 2, 3], 44_100).expect("write");
        let before = std::fs::read(&path).unwrap();

        append_samples(&path, &[4, 5], 44_100).expect("append");
        let after = std::fs::read(&path).unwrap();

        assert_eq!(after.len(), before.len() + 4, "two i16 samples appended");

        // RIFF size (offset 4) and data chunk size are patched
        let riff_size = u32::from_le_bytes(after[4..8].try_into().unwrap());
        assert_eq!(riff_size as usize, after.len() - 8);

        let (samples, rate) = read_samples(&path).expect("read back");
        assert_eq!(rate, 44_100);
        assert_eq!(samples, vec![1, 2, 3, 4, 5]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn append_rejects_mismatched_rate() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("machine-spectrum-mismatch-{}.wav", std::process::id()));

        write_samples(&path, &[1], 22_050).expect("write");
        assert!(append_samples(&path, &[2], 44_100).is_err());

        std::fs::remove_file(&path).ok();
    }
}
