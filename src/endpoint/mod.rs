//! Voice endpointing
//!
//! Turns the continuous capture stream into discrete utterances. Each frame
//! is classified as speech or silence; an utterance opens on the first speech
//! frame and closes once trailing silence reaches the threshold. The trailing
//! silence stays in the utterance so transcription sees natural context.

pub mod classifier;

pub use classifier::{EnergyClassifier, SpeechClassifier, WebRtcClassifier};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::audio::AudioFrame;

/// Endpointing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Registered classifier name ("webrtc" or "energy")
    pub classifier: String,
    /// Trailing silence that closes an utterance once reached
    pub silence_threshold_ms: u64,
    /// WebRTC aggressiveness, 0 (quality) to 3 (very aggressive)
    pub vad_mode: u8,
    /// RMS level above which the energy classifier reports speech
    pub energy_threshold: f32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            classifier: "webrtc".to_string(),
            silence_threshold_ms: 300,
            vad_mode: 0,
            energy_threshold: 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Idle,
    InSpeech,
}

/// One complete utterance, frames in capture order
#[derive(Debug, Clone)]
pub struct EndpointEvent {
    pub frames: Vec<AudioFrame>,
}

impl EndpointEvent {
    pub fn duration_ms(&self) -> u64 {
        self.frames.iter().map(AudioFrame::duration_ms).sum()
    }
}

/// Outcome of feeding one frame
#[derive(Debug, Default)]
pub struct FrameDecision {
    /// The classifier saw speech in this frame
    pub is_speech: bool,
    /// An utterance closed on this frame
    pub event: Option<EndpointEvent>,
}

pub struct Endpointer {
    classifier: Box<dyn SpeechClassifier>,
    frame_bytes: usize,
    silence_threshold_ms: u64,
    state: EndpointState,
    buffer: Vec<AudioFrame>,
    silence_ms: u64,
}

impl Endpointer {
    /// `frame_bytes` is the only frame length accepted
    pub fn new(classifier: Box<dyn SpeechClassifier>, frame_bytes: usize, silence_threshold_ms: u64) -> Self {
        Self {
            classifier,
            frame_bytes,
            silence_threshold_ms,
            state: EndpointState::Idle,
            buffer: Vec::new(),
            silence_ms: 0,
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Frames buffered for the open utterance
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn process(&mut self, frame: AudioFrame) -> FrameDecision {
        if frame.len() != self.frame_bytes {
            warn!(
                "Ignoring {} byte frame, expected {} bytes",
                frame.len(),
                self.frame_bytes
            );
            return FrameDecision::default();
        }

        let is_speech = self.classifier.is_speech(&frame);
        let frame_ms = frame.duration_ms();

        let event = match (self.state, is_speech) {
            (EndpointState::Idle, false) => None,
            (EndpointState::Idle, true) => {
                debug!("Speech started at {}ms", frame.timestamp_ms);
                self.buffer.push(frame);
                self.state = EndpointState::InSpeech;
                self.silence_ms = 0;
                None
            }
            (EndpointState::InSpeech, true) => {
                self.buffer.push(frame);
                self.silence_ms = 0;
                None
            }
            (EndpointState::InSpeech, false) => {
                self.buffer.push(frame);
                self.silence_ms += frame_ms;
                if self.silence_ms >= self.silence_threshold_ms {
                    let frames = std::mem::take(&mut self.buffer);
                    self.state = EndpointState::Idle;
                    self.silence_ms = 0;
                    debug!("Utterance complete: {} frames", frames.len());
                    Some(EndpointEvent { frames })
                } else {
                    None
                }
            }
        };

        FrameDecision { is_speech, event }
    }

    /// Drop any buffered frames and return to idle without emitting
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = EndpointState::Idle;
        self.silence_ms = 0;
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }
}
