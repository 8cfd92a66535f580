use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, Stream, StreamConfig};
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioConfig, AudioStreamConfig};
use super::queue::{CaptureSink, PlaybackReader};
use crate::error::{VoiceError, VoiceResult};

/// Device names reported by the default host
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// List input and output device names
pub fn list_devices() -> VoiceResult<DeviceList> {
    let host = cpal::default_host();
    let inputs = host.input_devices()?.filter_map(|d| d.name().ok()).collect();
    let outputs = host.output_devices()?.filter_map(|d| d.name().ok()).collect();
    Ok(DeviceList { inputs, outputs })
}

/// First device whose name contains `pattern`
///
/// An empty pattern picks the host default, falling back to the first device.
fn select_device(
    devices: impl Iterator<Item = Device>,
    default: Option<Device>,
    pattern: &str,
    direction: &'static str,
) -> VoiceResult<Device> {
    if pattern.is_empty() {
        if let Some(device) = default {
            return Ok(device);
        }
    }
    for device in devices {
        match device.name() {
            Ok(name) if name.contains(pattern) => return Ok(device),
            Ok(_) => {}
            Err(e) => warn!("Skipping {} device with unreadable name: {}", direction, e),
        }
    }
    Err(VoiceError::DeviceNotFound {
        direction,
        pattern: pattern.to_string(),
    })
}

fn stream_config(config: &AudioStreamConfig) -> StreamConfig {
    StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Default,
    }
}

/// Real audio devices through cpal (16-bit streams)
pub struct CpalBackend {
    input: Device,
    output: Device,
    input_config: AudioStreamConfig,
    output_config: AudioStreamConfig,
    streams: Vec<Stream>,
}

impl CpalBackend {
    /// Select input and output devices independently
    pub fn open(config: &AudioConfig) -> VoiceResult<Self> {
        let host = cpal::default_host();

        let input = select_device(
            host.input_devices()?,
            host.default_input_device(),
            &config.input.device,
            "input",
        )?;
        let output = select_device(
            host.output_devices()?,
            host.default_output_device(),
            &config.output.device,
            "output",
        )?;

        info!(
            "Audio devices selected: input \"{}\", output \"{}\"",
            input.name().unwrap_or_else(|_| "unknown".to_string()),
            output.name().unwrap_or_else(|_| "unknown".to_string())
        );

        Ok(Self {
            input,
            output,
            input_config: config.input.clone(),
            output_config: config.output.clone(),
            streams: Vec::new(),
        })
    }
}

impl AudioBackend for CpalBackend {
    fn start(&mut self, mut capture: CaptureSink, mut playback: PlaybackReader) -> VoiceResult<()> {
        if !self.streams.is_empty() {
            return Err(VoiceError::AudioStream("streams already started".to_string()));
        }

        let input_stream = self.input.build_input_stream(
            &stream_config(&self.input_config),
            move |data: &[i16], _: &cpal::InputCallbackInfo| capture.on_samples(data),
            |err| warn!("Capture stream error: {}", err),
            None,
        )?;

        let output_stream = self.output.build_output_stream(
            &stream_config(&self.output_config),
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| playback.fill_i16(data),
            |err| warn!("Playback stream error: {}", err),
            None,
        )?;

        input_stream.play()?;
        output_stream.play()?;
        self.streams = vec![input_stream, output_stream];

        info!(
            "Audio streams started: capture {}Hz/{}ch, playback {}Hz/{}ch, {}ms frames",
            self.input_config.sample_rate,
            self.input_config.channels,
            self.output_config.sample_rate,
            self.output_config.channels,
            self.input_config.chunk_duration_ms
        );
        Ok(())
    }

    fn stop(&mut self) -> VoiceResult<()> {
        for stream in self.streams.drain(..) {
            stream.pause()?;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        !self.streams.is_empty()
    }

    fn name(&self) -> &str {
        "cpal"
    }
}
