//! Spectrum host runner.
//!
//! Drives the machine against wall-clock time, opens host audio for the
//! beeper (degrading gracefully when no device exists), and handles tape
//! input/output from the command line. Headless mode runs a fixed number
//! of frames flat out and can dump the beeper output to a WAV file.

mod audio;

use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use machine_spectrum::{
    RecordFormat, Spectrum, SpectrumConfig, SpectrumError, TapeFormat, CPU_HZ,
};

use audio::AudioOutput;

/// Longest slice of emulated time per loop iteration.
const MAX_BATCH_SECONDS: f64 = 0.25;

/// Beeper lead (in samples) above which the main loop yields to let the
/// audio consumer catch up.
const THROTTLE_LATENCY_SAMPLES: f64 = 9216.0;

/// Longest single throttle sleep.
const MAX_THROTTLE: Duration = Duration::from_millis(8);

/// Frame pacing for realtime mode (50 Hz PAL).
const FRAME_DURATION: Duration = Duration::from_micros(20_000);

/// Audio samples per frame at 44.1 kHz / 50 Hz.
const SAMPLES_PER_FRAME: usize = 882;

struct CliArgs {
    rom_path: Option<PathBuf>,
    tape_path: Option<PathBuf>,
    tape_format: Option<TapeFormat>,
    record_path: Option<PathBuf>,
    record_format: Option<RecordFormat>,
    append: bool,
    audio_dump_path: Option<PathBuf>,
    headless: bool,
    frames: u64,
    tape_debug: bool,
    beeper_log: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        rom_path: None,
        tape_path: None,
        tape_format: None,
        record_path: None,
        record_format: None,
        append: false,
        audio_dump_path: None,
        headless: false,
        frames: 0,
        tape_debug: false,
        beeper_log: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rom" => {
                i += 1;
                cli.rom_path = args.get(i).map(PathBuf::from);
            }
            "--tap" => {
                i += 1;
                cli.tape_path = args.get(i).map(PathBuf::from);
                cli.tape_format = Some(TapeFormat::Tap);
            }
            "--tzx" => {
                i += 1;
                cli.tape_path = args.get(i).map(PathBuf::from);
                cli.tape_format = Some(TapeFormat::Tzx);
            }
            "--wav" => {
                i += 1;
                cli.tape_path = args.get(i).map(PathBuf::from);
                cli.tape_format = Some(TapeFormat::Wav);
            }
            "--record-tap" => {
                i += 1;
                cli.record_path = args.get(i).map(PathBuf::from);
                cli.record_format = Some(RecordFormat::Tap);
            }
            "--record-wav" => {
                i += 1;
                cli.record_path = args.get(i).map(PathBuf::from);
                cli.record_format = Some(RecordFormat::Wav);
            }
            "--append" => cli.append = true,
            "--audio-dump" => {
                i += 1;
                cli.audio_dump_path = args.get(i).map(PathBuf::from);
            }
            "--headless" => cli.headless = true,
            "--frames" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.frames = s.parse().unwrap_or(0);
                }
            }
            "--tape-debug" => cli.tape_debug = true,
            "--beeper-log" => cli.beeper_log = true,
            "--help" | "-h" => {
                eprintln!("Usage: spectrum-runner --rom <file> [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --rom <file>         16K ROM image (required)");
                eprintln!("  --tap <file>         Insert a TAP tape");
                eprintln!("  --tzx <file>         Insert a TZX tape");
                eprintln!("  --wav <file>         Insert a WAV tape");
                eprintln!("  --record-tap <file>  Record MIC output as TAP");
                eprintln!("  --record-wav <file>  Record MIC output as WAV");
                eprintln!("  --append             Shift-record: append to the WAV output");
                eprintln!("  --audio-dump <file>  Dump beeper audio to a WAV (implies no device)");
                eprintln!("  --headless           Run without pacing to wall-clock time");
                eprintln!("  --frames <n>         Stop after n frames (0 = run until killed)");
                eprintln!("  --tape-debug         Tape diagnostics on stderr");
                eprintln!("  --beeper-log         Beeper/ULA diagnostics on stderr");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn make_spectrum(cli: &CliArgs) -> Spectrum {
    let Some(rom_path) = &cli.rom_path else {
        eprintln!("A ROM image is required (--rom <file>)");
        process::exit(1);
    };
    let rom = match std::fs::read(rom_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("rom: {}: {e}", rom_path.display());
            process::exit(1);
        }
    };

    let config = SpectrumConfig {
        rom,
        tape_input_path: cli.tape_path.clone(),
        tape_input_format: cli.tape_format,
        recorder_output_path: cli.record_path.clone(),
        recorder_output_format: cli.record_format,
        audio_dump_path: cli.audio_dump_path.clone(),
        tape_debug: cli.tape_debug,
        beeper_log: cli.beeper_log,
    };

    match Spectrum::new(&config) {
        Ok(spectrum) => spectrum,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

/// Run one batch of emulation, aborting the process on a decode fault.
fn run_batch(spectrum: &mut Spectrum, budget: u64) {
    if let Err(e) = spectrum.run(budget) {
        // A decode fault is unrecoverable: report and abort with the
        // machine state intact on stderr.
        eprintln!("{e}");
        if let SpectrumError::UnknownOpcode(fault) = &e {
            let regs = &spectrum.cpu().regs;
            eprintln!(
                "cpu: PC={:04X} SP={:04X} AF={:04X} BC={:04X} DE={:04X} HL={:04X} (fault at {:04X})",
                regs.pc,
                regs.sp,
                regs.af(),
                regs.bc(),
                regs.de(),
                regs.hl(),
                fault.pc
            );
        }
        let _ = spectrum.shutdown();
        process::exit(1);
    }
}

fn finish(spectrum: &mut Spectrum) {
    if let Err(e) = spectrum.shutdown() {
        eprintln!("{e}");
        process::exit(1);
    }
}

/// Headless: run a fixed number of frames flat out, draining the beeper
/// on the main thread (optionally into a WAV dump).
fn run_headless(mut spectrum: Spectrum, cli: &CliArgs) {
    let frames = if cli.frames == 0 { 200 } else { cli.frames };
    let consumer = spectrum.beeper_consumer();
    let mut dump: Vec<i16> = Vec::new();
    let mut frame_samples = [0i16; SAMPLES_PER_FRAME];

    let budget = u64::from(machine_spectrum::T_STATES_PER_FRAME);
    for _ in 0..frames {
        run_batch(&mut spectrum, budget);
        let _ = spectrum.take_frame_ready();

        consumer.fill(&mut frame_samples);
        if cli.audio_dump_path.is_some() {
            dump.extend_from_slice(&frame_samples);
        }
    }

    finish(&mut spectrum);

    if let Some(path) = &cli.audio_dump_path {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: audio::SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let result = hound::WavWriter::create(path, spec).and_then(|mut writer| {
            for &sample in &dump {
                writer.write_sample(sample)?;
            }
            writer.finalize()
        });
        match result {
            Ok(()) => eprintln!("audio: dumped {} samples to {}", dump.len(), path.display()),
            Err(e) => {
                eprintln!("audio: {}: {e}", path.display());
                process::exit(1);
            }
        }
    }
}

/// Realtime: pace emulation to the wall clock, with the audio callback
/// consuming the beeper queue and latency-based throttling in between.
fn run_realtime(mut spectrum: Spectrum, cli: &CliArgs) {
    let _audio = match AudioOutput::new(spectrum.beeper_consumer()) {
        Ok(output) => Some(output),
        Err(message) => {
            eprintln!("{}", SpectrumError::AudioDeviceUnavailable(message));
            None
        }
    };
    let audio_open = _audio.is_some();

    let mut frames_done: u64 = 0;
    let mut last = Instant::now();

    loop {
        let elapsed = last.elapsed().as_secs_f64().min(MAX_BATCH_SECONDS);
        last = Instant::now();

        let budget = (elapsed * f64::from(CPU_HZ)) as u64;
        if budget > 0 {
            run_batch(&mut spectrum, budget);
        }

        if spectrum.take_frame_ready() {
            frames_done += 1;
            if cli.frames > 0 && frames_done >= cli.frames {
                break;
            }
        }

        if audio_open {
            let latency = spectrum.beeper().latency_samples();
            if latency > THROTTLE_LATENCY_SAMPLES {
                let excess = latency - THROTTLE_LATENCY_SAMPLES;
                let wait = Duration::from_secs_f64(excess / f64::from(audio::SAMPLE_RATE));
                thread::sleep(wait.min(MAX_THROTTLE));
                continue;
            }
        }

        // Pace to 50 Hz
        let spent = last.elapsed();
        if spent < FRAME_DURATION {
            thread::sleep(FRAME_DURATION - spent);
        }
    }

    finish(&mut spectrum);
}

fn main() {
    let cli = parse_args();
    let mut spectrum = make_spectrum(&cli);

    // Tape transport: anything inserted starts playing, and a configured
    // recorder starts capturing.
    if cli.tape_path.is_some() {
        spectrum.tape_play();
    }
    if cli.record_path.is_some() {
        if let Err(e) = spectrum.start_recording(cli.append) {
            eprintln!("{e}");
            process::exit(1);
        }
    }

    if cli.headless || cli.audio_dump_path.is_some() {
        run_headless(spectrum, &cli);
    } else {
        run_realtime(spectrum, &cli);
    }
}
