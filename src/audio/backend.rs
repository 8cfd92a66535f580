use serde::Deserialize;
use std::sync::Arc;

use super::queue::{CaptureSink, PlaybackReader};
use crate::error::VoiceResult;

/// Bytes per 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// One tick of audio: 16-bit signed little-endian PCM, interleaved
///
/// The byte buffer is shared and never mutated after construction, so frames
/// can be cloned freely between the capture queue, the endpointer buffer and
/// transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Arc<[u8]>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Milliseconds since the producing stream started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Wrap raw PCM bytes
    pub fn from_bytes(data: impl Into<Arc<[u8]>>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data: data.into(),
            sample_rate,
            channels,
            timestamp_ms: 0,
        }
    }

    /// Encode samples as little-endian PCM
    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::from_bytes(data, sample_rate, channels)
    }

    /// A zero-filled frame of exactly `len` bytes
    pub fn silence(len: usize, sample_rate: u32, channels: u16) -> Self {
        Self::from_bytes(vec![0u8; len], sample_rate, channels)
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the PCM payload into samples (a trailing odd byte is ignored)
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect()
    }

    /// Duration in milliseconds derived from the sample count
    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        (self.data.len() / BYTES_PER_SAMPLE) as u64 * 1000 / per_second
    }
}

/// Configuration for one direction of audio I/O
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioStreamConfig {
    /// Substring matched against device names; empty matches the first device
    pub device: String,
    /// Number of channels (1 = mono)
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Duration of one frame in milliseconds (affects latency)
    pub chunk_duration_ms: u32,
    /// Capture queue capacity in frames; frames beyond it are dropped
    pub queue_capacity: usize,
}

impl Default for AudioStreamConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            channels: 1,
            sample_rate: 16000,
            chunk_duration_ms: 10,
            queue_capacity: 1024,
        }
    }
}

impl AudioStreamConfig {
    /// Samples per channel in one frame
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate / 1000 * self.chunk_duration_ms) as usize
    }

    /// Bytes in one frame: `sampleRate/1000 * chunkDurationMs * 2` per channel
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * self.channels as usize * BYTES_PER_SAMPLE
    }
}

/// Audio I/O configuration (input and output are selected independently)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input: AudioStreamConfig,
    pub output: AudioStreamConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input: AudioStreamConfig::default(),
            output: AudioStreamConfig {
                sample_rate: 24000,
                ..AudioStreamConfig::default()
            },
        }
    }
}

/// Platform audio seam
///
/// Implementations own the hardware streams. Their capture callback feeds
/// `CaptureSink::on_samples` and their playback callback drains
/// `PlaybackReader::fill_i16`; both calls are non-blocking, so the real-time
/// threads never wait on the rest of the system.
///
/// Implementations:
/// - `CpalBackend`: real devices through cpal
/// - `SimulatedBackend`: a timer thread with synthetic input (tests, demos)
pub trait AudioBackend {
    /// Open and start both streams
    fn start(&mut self, capture: CaptureSink, playback: PlaybackReader) -> VoiceResult<()>;

    /// Stop both streams; safe to call when not started
    fn stop(&mut self) -> VoiceResult<()>;

    /// Check if the streams are running
    fn is_running(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
