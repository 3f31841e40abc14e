//! End-to-end machine tests: ROM programs driving the ULA, beeper, and tape
//! subsystems through the full per-instruction pipeline.

use machine_spectrum::tape::{player, tap, TapeBlock};
use machine_spectrum::{Spectrum, SpectrumConfig, TapeFormat, CPU_HZ};

fn rom_with(program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000];
    rom[..program.len()].copy_from_slice(program);
    rom
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("machine-spectrum-it-{}-{name}", std::process::id()))
}

#[test]
fn tap_playback_drives_the_ear_line() {
    // A small TAP on disk, inserted via the configuration.
    let tap_path = temp_path("ear.tap");
    let image = tap::make_record(0xFF, &[0xAA, 0x55]);
    std::fs::write(&tap_path, &image).expect("write TAP");

    let mut config = SpectrumConfig::new(rom_with(&[0xC3, 0x00, 0x00])); // JP 0
    config.tape_input_path = Some(tap_path.clone());
    config.tape_input_format = Some(TapeFormat::Tap);

    let mut spectrum = Spectrum::new(&config).expect("machine");
    spectrum.tape_play();
    assert!(spectrum.tape_playing());

    // Sample the EAR line across a few pilot pulses (2168 T-states each)
    let mut seen_low = false;
    let mut seen_high = false;
    for _ in 0..5_000 {
        spectrum.step_instruction().expect("steps");
        match spectrum.bus().tape_ear {
            Some(true) => seen_high = true,
            Some(false) => seen_low = true,
            None => {}
        }
    }
    assert!(seen_low && seen_high, "pilot tone toggles the EAR line");

    std::fs::remove_file(&tap_path).ok();
}

#[test]
fn ear_bit_visible_on_port_reads() {
    // Program: loop { IN A,(0xFE); LD (0x8000),A; JP 0 } — the ROM can't
    // write to itself, so store the sample in RAM instead.
    let program = [
        0xDB, 0xFE, // IN A,(0xFE)
        0x32, 0x00, 0x80, // LD (0x8000),A
        0xC3, 0x00, 0x00, // JP 0
    ];

    let tap_path = temp_path("port.tap");
    std::fs::write(&tap_path, tap::make_record(0xFF, &[0x00; 32])).expect("write TAP");

    let mut config = SpectrumConfig::new(rom_with(&program));
    config.tape_input_path = Some(tap_path.clone());
    config.tape_input_format = Some(TapeFormat::Tap);

    let mut spectrum = Spectrum::new(&config).expect("machine");
    spectrum.tape_play();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..10_000 {
        spectrum.step_instruction().expect("steps");
        seen.insert(spectrum.bus().memory.read(0x8000) & 0x40);
    }
    assert!(seen.contains(&0x00) && seen.contains(&0x40), "{seen:?}");

    std::fs::remove_file(&tap_path).ok();
}

#[test]
fn beeper_loop_produces_audible_square_wave() {
    // Toggle bit 4 of port 0xFE with a delay loop in between.
    let program = [
        0x3E, 0x10, // LD A,0x10
        0xD3, 0xFE, // OUT (0xFE),A
        0x06, 0x14, // LD B,20
        0x10, 0xFE, // DJNZ -2
        0xAF, // XOR A
        0xD3, 0xFE, // OUT (0xFE),A
        0x06, 0x14, // LD B,20
        0x10, 0xFE, // DJNZ -2
        0xC3, 0x00, 0x00, // JP 0
    ];

    let mut spectrum = Spectrum::new(&SpectrumConfig::new(rom_with(&program))).expect("machine");
    let consumer = spectrum.beeper_consumer();

    // A tenth of a second of emulated time
    spectrum.run(u64::from(CPU_HZ) / 10).expect("runs");

    let mut samples = vec![0i16; 4410];
    consumer.fill(&mut samples);

    let positive = samples.iter().filter(|&&s| s > 200).count();
    let negative = samples.iter().filter(|&&s| s < -200).count();
    assert!(positive > 500, "high half-waves present: {positive}");
    assert!(negative > 500, "low half-waves present: {negative}");

    let mean: f64 =
        samples.iter().map(|&s| f64::from(s)).sum::<f64>() / samples.len() as f64;
    assert!(mean.abs() < 100.0, "DC blocked: mean {mean}");
}

#[test]
fn beeper_latency_tracks_emulation_lead() {
    let program = [
        0x3E, 0x10, 0xD3, 0xFE, 0xAF, 0xD3, 0xFE, 0xC3, 0x00, 0x00,
    ];
    let mut spectrum = Spectrum::new(&SpectrumConfig::new(rom_with(&program))).expect("machine");

    spectrum.run(100_000).expect("runs");
    let latency = spectrum.beeper().latency_samples();
    assert!(latency > 1000.0, "emulation far ahead of audio: {latency}");

    let consumer = spectrum.beeper_consumer();
    let mut samples = vec![0i16; 1000];
    consumer.fill(&mut samples);
    assert!(spectrum.beeper().latency_samples() < latency);
}

#[test]
fn mic_program_records_a_wav_session() {
    // Toggle the MIC bit (bit 3) with delay loops; the recorder captures
    // the pulses and writes them on stop.
    let program = [
        0x3E, 0x08, // LD A,0x08
        0xD3, 0xFE, // OUT (0xFE),A
        0x06, 0x00, // LD B,0 (256 iterations)
        0x10, 0xFE, // DJNZ -2
        0xAF, // XOR A
        0xD3, 0xFE, // OUT (0xFE),A
        0x06, 0x00, // LD B,0
        0x10, 0xFE, // DJNZ -2
        0xC3, 0x00, 0x00, // JP 0
    ];

    let wav_path = temp_path("mic.wav");
    let mut config = SpectrumConfig::new(rom_with(&program));
    config.recorder_output_path = Some(wav_path.clone());
    config.recorder_output_format = Some(machine_spectrum::RecordFormat::Wav);

    let mut spectrum = Spectrum::new(&config).expect("machine");
    spectrum.start_recording(false).expect("record");

    spectrum.run(500_000).expect("runs");
    spectrum.shutdown().expect("flushes");

    let mut reader = hound::WavReader::open(&wav_path).expect("file written");
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().sample_rate, 44_100);
    let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
    assert!(
        samples.iter().any(|&s| s > 0) && samples.iter().any(|&s| s < 0),
        "both MIC levels captured ({} samples)",
        samples.len()
    );

    std::fs::remove_file(&wav_path).ok();
}

#[test]
fn synthesized_header_matches_rom_loader_shape() {
    // Scenario: a 19-byte header block produces 8063 pilot pulses, the two
    // sync pulses, then 304 data pulses of the two bit lengths.
    let mut data = vec![0x00u8];
    data.extend_from_slice(&[0x55; 17]);
    let checksum = data.iter().fold(0u8, |acc, &b| acc ^ b);
    data.push(checksum);
    let block = TapeBlock::standard(data, 0);

    let waveform = player::synthesize_blocks(&[block]);
    assert_eq!(waveform.pulses.len(), 8063 + 2 + 19 * 8 * 2);
    assert_eq!(waveform.pulses[8063], 667);
    assert_eq!(waveform.pulses[8064], 735);
    for &pulse in &waveform.pulses[8065..] {
        assert!(pulse == 855 || pulse == 1710, "bit pulse lengths only");
    }
}

#[test]
fn wav_tape_seek_and_resume() {
    // Generate a WAV with alternating 50-sample runs, load it, seek, play.
    let wav_path = temp_path("seek.wav");
    {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&wav_path, spec).expect("create");
        for run in 0..40 {
            let value: i16 = if run % 2 == 0 { 8000 } else { -8000 };
            for _ in 0..50 {
                writer.write_sample(value).expect("write");
            }
        }
        writer.finalize().expect("finalize");
    }

    let mut config = SpectrumConfig::new(rom_with(&[0xC3, 0x00, 0x00]));
    config.tape_input_path = Some(wav_path.clone());
    config.tape_input_format = Some(TapeFormat::Wav);

    let mut spectrum = Spectrum::new(&config).expect("machine");

    // Each run is round(50 * 3.5e6 / 44100) = 3968 T-states
    spectrum.tape_seek(4000).expect("seek into the second pulse");
    spectrum.tape_play();

    let mut transitions = 0;
    let mut last = spectrum.bus().tape_ear;
    for _ in 0..20_000 {
        spectrum.step_instruction().expect("steps");
        let now = spectrum.bus().tape_ear;
        if now != last {
            transitions += 1;
            last = now;
        }
    }
    assert!(transitions >= 2, "playback continued after seek");

    std::fs::remove_file(&wav_path).ok();
}
