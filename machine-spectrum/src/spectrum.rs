//! Top-level Spectrum system.
//!
//! Owns exactly one of everything: CPU, bus (memory, ULA, keyboard), clock,
//! beeper, tape player, tape recorder. The host loop calls `run()` with a
//! cycle budget; every instruction is followed by ULA event processing,
//! tape playback, and recorder housekeeping, and each 69,888 T-state frame
//! boundary fires the maskable interrupt and raises the frame-ready flag
//! for the renderer.

use std::fs;
use std::io::BufReader;

use cpu_z80::Z80;

use crate::beeper::{BeeperConsumer, BeeperState};
use crate::bus::SpectrumBus;
use crate::clock::Clock;
use crate::config::SpectrumConfig;
use crate::error::SpectrumError;
use crate::memory::Memory48K;
use crate::tape::player::{Phase, TapePlayer};
use crate::tape::recorder::TapeRecorder;
use crate::tape::{tap, tzx, wav, RecordFormat, TapeFormat};
use crate::{CPU_HZ, T_STATES_PER_FRAME};

/// Audio output sample rate.
const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Data bus byte during interrupt acceptance; the Spectrum's floats high.
const INT_DATA_BUS: u8 = 0xFF;

#[derive(Debug)]
pub struct Spectrum {
    cpu: Z80,
    bus: SpectrumBus,
    clock: Clock,
    beeper: BeeperState,
    player: Option<TapePlayer>,
    recorder: TapeRecorder,
    /// T-states accumulated toward the next vsync.
    frame_t: u32,
    frame_ready: bool,
    tape_debug: bool,
    beeper_log: bool,
    last_logged_phase: Phase,
}

impl Spectrum {
    /// Build a Spectrum from the configuration, loading any tape input.
    ///
    /// # Errors
    ///
    /// `InvalidRom` for a bad ROM image; `TapeIo`/`TapeParse` for a broken
    /// tape file; `TapeStateConflict` for inconsistent tape options.
    pub fn new(config: &SpectrumConfig) -> Result<Self, SpectrumError> {
        let memory = Memory48K::new(&config.rom)?;
        let bus = SpectrumBus::new(memory);
        let beeper = BeeperState::new(CPU_HZ, AUDIO_SAMPLE_RATE);

        let mut recorder = TapeRecorder::new(
            config.recorder_output_format.unwrap_or(RecordFormat::Wav),
            AUDIO_SAMPLE_RATE,
        );
        if let Some(path) = &config.recorder_output_path {
            recorder.set_output(path.clone());
        }
        recorder.set_debug(config.tape_debug);

        let player = Self::load_tape(config)?;

        Ok(Self {
            cpu: Z80::new(),
            bus,
            clock: Clock::new(),
            beeper,
            player,
            recorder,
            frame_t: 0,
            frame_ready: false,
            tape_debug: config.tape_debug,
            beeper_log: config.beeper_log,
            last_logged_phase: Phase::Idle,
        })
    }

    fn load_tape(config: &SpectrumConfig) -> Result<Option<TapePlayer>, SpectrumError> {
        let Some(path) = &config.tape_input_path else {
            return Ok(None);
        };
        let Some(format) = config.tape_input_format else {
            return Err(SpectrumError::TapeStateConflict(
                "tape input path given without a format".to_string(),
            ));
        };

        let player = match format {
            TapeFormat::Tap => {
                let data = fs::read(path).map_err(|source| SpectrumError::TapeIo {
                    path: path.clone(),
                    source,
                })?;
                let blocks = tap::parse(&data).map_err(SpectrumError::TapeParse)?;
                TapePlayer::from_blocks(blocks)
            }
            TapeFormat::Tzx => {
                let data = fs::read(path).map_err(|source| SpectrumError::TapeIo {
                    path: path.clone(),
                    source,
                })?;
                let tzx = tzx::parse(&data).map_err(SpectrumError::TapeParse)?;
                TapePlayer::from_blocks(tzx.blocks)
            }
            TapeFormat::Wav => {
                let file = fs::File::open(path).map_err(|source| SpectrumError::TapeIo {
                    path: path.clone(),
                    source,
                })?;
                let waveform = wav::decode_waveform(BufReader::new(file))
                    .map_err(SpectrumError::TapeParse)?;
                TapePlayer::from_waveform(waveform)
            }
        };
        Ok(Some(player))
    }

    /// Execute one instruction and run the per-instruction pipeline:
    /// ULA events, tape playback, recorder housekeeping, frame accounting.
    ///
    /// # Errors
    ///
    /// `UnknownOpcode` when the CPU decodes garbage. The machine state is
    /// left as of the fault for diagnostics.
    pub fn step_instruction(&mut self) -> Result<u32, SpectrumError> {
        self.bus.begin_instruction(self.clock.now());
        let t_states = self.cpu.step(&mut self.bus)?;
        self.clock.advance(t_states);

        if self.beeper_log {
            let pending = self.bus.ula.pending();
            if pending > 0 {
                eprintln!("beeper: {pending} port write(s) at T={}", self.clock.now());
            }
        }
        self.bus
            .ula
            .process_events(&mut self.beeper, &mut self.recorder);

        if let Some(player) = &mut self.player {
            player.update(self.clock.now());
            self.bus.tape_ear = player.ear();
            if self.tape_debug && player.phase() != self.last_logged_phase {
                self.last_logged_phase = player.phase();
                eprintln!(
                    "tape: {:?} at T={} (position {})",
                    player.phase(),
                    self.clock.now(),
                    player.position_tstates()
                );
            }
        }

        self.recorder.update(self.clock.now(), false);

        self.frame_t += t_states;
        if self.frame_t >= T_STATES_PER_FRAME {
            self.frame_t -= T_STATES_PER_FRAME;
            if self.cpu.regs.iff1 {
                self.bus.begin_instruction(self.clock.now());
                let int_t = self.cpu.interrupt(&mut self.bus, INT_DATA_BUS);
                self.clock.advance(int_t);
                self.frame_t += int_t;
            }
            self.frame_ready = true;
        }

        Ok(t_states)
    }

    /// Run at least `budget` T-states worth of instructions.
    ///
    /// # Errors
    ///
    /// Propagates the first `UnknownOpcode`.
    pub fn run(&mut self, budget: u64) -> Result<u64, SpectrumError> {
        let mut consumed: u64 = 0;
        while consumed < budget {
            consumed += u64::from(self.step_instruction()?);
        }
        Ok(consumed)
    }

    /// True once per completed frame: the renderer should present.
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    /// Flush the recorder, stop playback, and serialize output files.
    ///
    /// # Errors
    ///
    /// Propagates tape write failures.
    pub fn shutdown(&mut self) -> Result<(), SpectrumError> {
        let now = self.clock.now();
        if let Some(player) = &mut self.player {
            player.pause(now);
        }
        self.bus.tape_ear = None;
        self.recorder.stop(now)
    }

    // -----------------------------------------------------------------------
    // Tape controls
    // -----------------------------------------------------------------------

    /// Start or resume tape playback.
    pub fn tape_play(&mut self) {
        let now = self.clock.now();
        if let Some(player) = &mut self.player {
            player.start(now);
            self.bus.tape_ear = player.ear();
        }
    }

    /// Pause tape playback, retaining position.
    pub fn tape_pause(&mut self) {
        let now = self.clock.now();
        if let Some(player) = &mut self.player {
            player.pause(now);
            self.bus.tape_ear = player.ear();
        }
    }

    /// Rewind the tape to the start.
    pub fn tape_rewind(&mut self) {
        if let Some(player) = &mut self.player {
            player.rewind();
            self.bus.tape_ear = None;
        }
    }

    /// Seek to an absolute tape position (WAV tapes only).
    ///
    /// # Errors
    ///
    /// `TapeStateConflict` without a tape or for block-mode tapes.
    pub fn tape_seek(&mut self, t_state: u64) -> Result<(), SpectrumError> {
        let Some(player) = &mut self.player else {
            return Err(SpectrumError::TapeStateConflict(
                "no tape loaded".to_string(),
            ));
        };
        player.seek(t_state).map_err(SpectrumError::TapeStateConflict)
    }

    #[must_use]
    pub fn tape_playing(&self) -> bool {
        self.player.as_ref().is_some_and(TapePlayer::is_playing)
    }

    #[must_use]
    pub fn tape_finished(&self) -> bool {
        self.player.as_ref().is_some_and(TapePlayer::is_finished)
    }

    /// Begin recording. `append` preserves the existing file and grows it
    /// (shift-record); a plain start overwrites from the current tape
    /// counter.
    ///
    /// # Errors
    ///
    /// `TapeStateConflict` per the recorder's rules.
    pub fn start_recording(&mut self, append: bool) -> Result<(), SpectrumError> {
        let head_samples = self
            .player
            .as_ref()
            .and_then(TapePlayer::position_samples)
            .unwrap_or(0);
        self.recorder.start(append, head_samples as usize)
    }

    /// Stop recording and write the session out.
    ///
    /// # Errors
    ///
    /// Propagates tape write failures.
    pub fn stop_recording(&mut self) -> Result<(), SpectrumError> {
        self.recorder.stop(self.clock.now())
    }

    // -----------------------------------------------------------------------
    // Host-facing accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &SpectrumBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SpectrumBus {
        &mut self.bus
    }

    /// Current border colour index (0..7), for the renderer.
    #[must_use]
    pub fn border_colour(&self) -> u8 {
        self.bus.ula.border_colour()
    }

    /// Display file + attributes ($4000-$5AFF), for the renderer.
    #[must_use]
    pub fn screen(&self) -> &[u8] {
        self.bus.memory.screen()
    }

    #[must_use]
    pub fn beeper(&self) -> &BeeperState {
        &self.beeper
    }

    /// A consumer handle for the host audio callback.
    #[must_use]
    pub fn beeper_consumer(&self) -> BeeperConsumer {
        self.beeper.consumer()
    }

    pub fn key_down(&mut self, row: usize, mask: u8) {
        self.bus.keyboard.key_down(row, mask);
    }

    pub fn key_up(&mut self, row: usize, mask: u8) {
        self.bus.keyboard.key_up(row, mask);
    }

    pub fn release_all_keys(&mut self) {
        self.bus.keyboard.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with(program: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; 0x4000];
        rom[..program.len()].copy_from_slice(program);
        rom
    }

    fn make_spectrum(program: &[u8]) -> Spectrum {
        Spectrum::new(&SpectrumConfig::new(rom_with(program))).expect("valid config")
    }

    #[test]
    fn invalid_rom_rejected() {
        let err = Spectrum::new(&SpectrumConfig::new(vec![0u8; 100])).unwrap_err();
        assert!(matches!(err, SpectrumError::InvalidRom { size: 100 }));
    }

    #[test]
    fn nop_loop_advances_clock() {
        // JP 0x0000 forever
        let mut spectrum = make_spectrum(&[0xC3, 0x00, 0x00]);
        let consumed = spectrum.run(1000).expect("runs");
        assert!(consumed >= 1000);
        assert_eq!(spectrum.clock().now(), consumed);
    }

    #[test]
    fn frame_boundary_raises_frame_ready() {
        let mut spectrum = make_spectrum(&[0xC3, 0x00, 0x00]);
        assert!(!spectrum.take_frame_ready());

        spectrum.run(u64::from(T_STATES_PER_FRAME)).expect("runs");
        assert!(spectrum.take_frame_ready());
        assert!(!spectrum.take_frame_ready(), "flag is one-shot");
    }

    #[test]
    fn frame_interrupt_fires_when_enabled() {
        // EI; loop: JP loop — with IM 1 the vsync should land at 0x0038
        let mut spectrum = make_spectrum(&[0xFB, 0xC3, 0x01, 0x00]);
        spectrum.cpu_mut().regs.sp = 0x8000;
        loop {
            spectrum.step_instruction().expect("steps");
            if spectrum.take_frame_ready() {
                break;
            }
        }
        assert_eq!(spectrum.cpu().regs.pc, 0x0038);
        assert!(!spectrum.cpu().regs.iff1);
        assert_eq!(spectrum.cpu().regs.sp, 0x7FFE, "return address pushed");
    }

    #[test]
    fn border_write_reaches_ula() {
        // LD A,0x07; OUT (0xFE),A; HALT-free loop
        let mut spectrum = make_spectrum(&[0x3E, 0x07, 0xD3, 0xFE, 0xC3, 0x04, 0x00]);
        spectrum.run(30).expect("runs");
        assert_eq!(spectrum.border_colour(), 7);
    }

    #[test]
    fn beeper_toggle_produces_single_event() {
        // LD A,0x10; OUT (0xFE),A; OUT (0xFE),A; XOR A; OUT (0xFE),A
        let program = [
            0x3E, 0x10, // LD A,0x10
            0xD3, 0xFE, // OUT (0xFE),A     -> beeper high
            0xD3, 0xFE, // OUT (0xFE),A     -> no change
            0xAF, // XOR A
            0xD3, 0xFE, // OUT (0xFE),A     -> beeper low
            0x76, // HALT
        ];
        let mut spectrum = make_spectrum(&program);
        for _ in 0..6 {
            spectrum.step_instruction().expect("steps");
        }

        let events = spectrum.beeper().pending();
        assert_eq!(events.len(), 2, "one rising, one falling: {events:?}");
        assert_eq!(events[0].1, 1);
        assert_eq!(events[1].1, 0);
        assert!(events[0].0 < events[1].0);

        // Timestamps fall inside their instructions' windows: the first OUT
        // begins at T=7 (after LD A,n) and stamps its write mid-instruction.
        assert!(events[0].0 >= 7 && events[0].0 < 7 + 11);
    }

    #[test]
    fn unknown_opcode_surfaces_as_error() {
        // ED 00 is a hole
        let mut spectrum = make_spectrum(&[0xED, 0x00]);
        let err = spectrum.step_instruction().unwrap_err();
        match err {
            SpectrumError::UnknownOpcode(fault) => {
                assert_eq!(fault.pc, 0x0000);
                assert_eq!(fault.opcode, 0x00);
            }
            other => panic!("expected UnknownOpcode, got {other}"),
        }
    }

    #[test]
    fn halted_machine_keeps_time() {
        let mut spectrum = make_spectrum(&[0xF3, 0x76]); // DI; HALT
        spectrum.run(500).expect("runs");
        assert!(spectrum.cpu().regs.halted);
        assert!(spectrum.clock().now() >= 500);
    }
}
