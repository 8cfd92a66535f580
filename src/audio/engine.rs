use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use super::assembler::FrameAssembler;
use super::backend::{AudioBackend, AudioConfig, AudioFrame};
use super::cpal_backend::CpalBackend;
use super::file::AudioFile;
use super::queue::{CaptureControl, CaptureQueue, CaptureSink, PlaybackQueue};
use crate::error::{VoiceError, VoiceResult};

/// Poll interval while waiting for playback to drain
const PLAYBACK_POLL: Duration = Duration::from_millis(10);

/// Result of a record-and-play-back self-test
#[derive(Debug, Clone)]
pub struct SelfTestReport {
    pub path: PathBuf,
    pub frames_captured: usize,
    pub duration_seconds: f64,
    pub sample_rate: u32,
}

/// Owns the audio backend and both frame queues
pub struct AudioEngine {
    backend: Box<dyn AudioBackend>,
    config: AudioConfig,
    capture_rx: Option<CaptureQueue>,
    capture: CaptureControl,
    playback: Arc<PlaybackQueue>,
}

impl AudioEngine {
    /// Open the configured devices through cpal and start both streams
    pub fn init(config: &AudioConfig) -> VoiceResult<Self> {
        let backend = CpalBackend::open(config)?;
        Self::with_backend(config, Box::new(backend))
    }

    /// Start an already-constructed backend
    pub fn with_backend(config: &AudioConfig, mut backend: Box<dyn AudioBackend>) -> VoiceResult<Self> {
        if config.input.frame_bytes() == 0 || config.output.frame_bytes() == 0 {
            return Err(VoiceError::Config(
                "audio frame size is zero; check sample_rate and chunk_duration_ms".to_string(),
            ));
        }

        let (sink, capture_rx, capture) = CaptureSink::channel(&config.input);
        let playback = PlaybackQueue::new(config.output.frame_bytes());
        backend.start(sink, playback.reader())?;

        info!(
            "Audio engine ready on {} backend ({} byte capture frames, {} byte playback frames)",
            backend.name(),
            config.input.frame_bytes(),
            config.output.frame_bytes()
        );

        Ok(Self {
            backend,
            config: config.clone(),
            capture_rx: Some(capture_rx),
            capture,
            playback,
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Take the capture queue; there is a single consumer
    pub fn capture_queue(&mut self) -> Option<CaptureQueue> {
        self.capture_rx.take()
    }

    /// Shared handle to the playback queue
    pub fn playback(&self) -> Arc<PlaybackQueue> {
        self.playback.clone()
    }

    pub fn enqueue_playback(&self, frame: AudioFrame) {
        self.playback.enqueue(frame);
    }

    /// Discard queued playback; returns the number of frames dropped
    pub fn clear_playback(&self) -> usize {
        self.playback.clear()
    }

    pub fn set_capture_active(&self, active: bool) {
        self.capture.set_active(active);
    }

    pub fn set_playback_active(&self, active: bool) {
        self.playback.set_active(active);
    }

    pub fn is_playback_complete(&self) -> bool {
        self.playback.is_empty()
    }

    pub async fn wait_playback_complete(&self) {
        while !self.is_playback_complete() {
            sleep(PLAYBACK_POLL).await;
        }
    }

    pub fn dropped_capture_frames(&self) -> u64 {
        self.capture.dropped_frames()
    }

    pub fn is_running(&self) -> bool {
        self.backend.is_running()
    }

    /// Stop the backend and discard pending playback
    pub fn shutdown(&mut self) -> VoiceResult<()> {
        if !self.backend.is_running() {
            return Ok(());
        }
        self.playback.clear();
        self.backend.stop()?;
        info!(
            "Audio engine stopped ({} capture frames dropped)",
            self.capture.dropped_frames()
        );
        Ok(())
    }

    /// Record `seconds` of capture, save it as WAV at the output rate, play it back
    pub async fn self_test(&mut self, seconds: f64, path: impl AsRef<Path>) -> VoiceResult<SelfTestReport> {
        let path = path.as_ref().to_path_buf();
        let mut rx = self
            .capture_queue()
            .ok_or_else(|| VoiceError::AudioStream("capture queue already taken".to_string()))?;

        let wanted = (seconds * 1000.0 / self.config.input.chunk_duration_ms as f64).ceil() as usize;
        info!("Self-test: recording {:.1}s ({} frames)", seconds, wanted);

        let mut frames = Vec::with_capacity(wanted);
        let deadline = Duration::from_secs_f64(seconds * 2.0 + 1.0);
        let recorded = timeout(deadline, async {
            while frames.len() < wanted {
                match rx.recv().await {
                    Some(frame) => frames.push(frame),
                    None => break,
                }
            }
        })
        .await;
        if recorded.is_err() {
            warn!("Self-test: capture stalled after {} frames", frames.len());
        }
        self.capture_rx = Some(rx);

        if frames.is_empty() {
            return Err(VoiceError::AudioStream("no audio captured".to_string()));
        }

        let output = &self.config.output;
        let mut recording = AudioFile::from_frames(&frames).resampled(output.sample_rate);
        if recording.channels != output.channels {
            recording = remix(&recording, output.channels);
        }
        recording.save(&path)?;

        let mut assembler = FrameAssembler::new(output.frame_bytes(), output.sample_rate, output.channels);
        let bytes: Vec<u8> = recording.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        for frame in assembler.push(&bytes) {
            self.enqueue_playback(frame);
        }
        if let Some(frame) = assembler.flush() {
            self.enqueue_playback(frame);
        }
        info!("Self-test: playing back {:.1}s", recording.duration_seconds);
        self.wait_playback_complete().await;

        Ok(SelfTestReport {
            path,
            frames_captured: frames.len(),
            duration_seconds: recording.duration_seconds,
            sample_rate: recording.sample_rate,
        })
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Audio engine shutdown failed: {}", e);
        }
    }
}

/// Downmix to mono or duplicate mono across channels
fn remix(file: &AudioFile, channels: u16) -> AudioFile {
    let from = file.channels.max(1) as usize;
    let to = channels.max(1) as usize;
    let mono: Vec<i16> = file
        .samples
        .chunks(from)
        .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / frame.len() as i32) as i16)
        .collect();
    let samples = mono.iter().flat_map(|&s| std::iter::repeat(s).take(to)).collect();
    AudioFile::new(samples, file.sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remix_stereo_to_mono() {
        let file = AudioFile::new(vec![100, 300, -100, -300], 16000, 2);
        let mono = remix(&file, 1);
        assert_eq!(mono.samples, vec![200, -200]);
        assert_eq!(mono.channels, 1);
    }

    #[test]
    fn test_remix_mono_to_stereo() {
        let file = AudioFile::new(vec![5, 6], 16000, 1);
        assert_eq!(remix(&file, 2).samples, vec![5, 5, 6, 6]);
    }
}
