//! Host audio output for the beeper.
//!
//! Opens a mono 44.1 kHz output stream; the cpal callback thread is the
//! sole consumer of the beeper event queue. If no device is available the
//! caller keeps running without audio — the beeper bookkeeping continues
//! either way.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use machine_spectrum::BeeperConsumer;

/// Audio sample rate in Hz. Must match the machine's beeper rate.
pub const SAMPLE_RATE: u32 = 44_100;

/// Keeps the cpal stream alive while the emulator runs.
pub struct AudioOutput {
    _stream: Stream,
}

impl AudioOutput {
    /// Open the default output device and start pulling from the consumer.
    ///
    /// # Errors
    ///
    /// Returns a message when no device is available or the stream cannot
    /// be built.
    pub fn new(consumer: BeeperConsumer) -> Result<Self, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string())?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    consumer.fill(data);
                },
                |err| eprintln!("audio: stream error: {err}"),
                None,
            )
            .map_err(|e| format!("build stream: {e}"))?;

        stream.play().map_err(|e| format!("start stream: {e}"))?;

        Ok(Self { _stream: stream })
    }
}
