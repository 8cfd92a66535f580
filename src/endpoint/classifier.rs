use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::audio::AudioFrame;
use crate::error::{VoiceError, VoiceResult};

/// Per-frame speech decision
///
/// Called once per capture frame inside the endpointing loop, so it must be
/// fast. Implementations are not required to be `Send`.
pub trait SpeechClassifier {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool;

    /// Get classifier name for logging
    fn name(&self) -> &str;
}

/// WebRTC voice activity detector
///
/// Accepts 10, 20 or 30 ms frames at 8, 16, 32 or 48 kHz.
pub struct WebRtcClassifier {
    vad: Vad,
    frame_samples: usize,
}

impl WebRtcClassifier {
    pub fn new(sample_rate: u32, chunk_duration_ms: u32, mode: u8) -> VoiceResult<Self> {
        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::Config(format!(
                    "WebRTC VAD only supports 8000, 16000, 32000 or 48000 Hz, got {}",
                    other
                )))
            }
        };
        if !matches!(chunk_duration_ms, 10 | 20 | 30) {
            return Err(VoiceError::Config(format!(
                "WebRTC VAD needs 10, 20 or 30 ms frames, got {} ms",
                chunk_duration_ms
            )));
        }
        let vad_mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => return Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", other))),
        };

        let mut vad = Vad::new();
        vad.set_mode(vad_mode);
        vad.set_sample_rate(rate);
        info!(
            "WebRTC VAD ready ({}Hz, {}ms frames, mode {})",
            sample_rate, chunk_duration_ms, mode
        );

        Ok(Self {
            vad,
            frame_samples: (sample_rate / 1000 * chunk_duration_ms) as usize,
        })
    }
}

impl SpeechClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        let samples = frame.samples();
        if samples.len() != self.frame_samples {
            warn!(
                "WebRTC VAD got {} samples, expected {}",
                samples.len(),
                self.frame_samples
            );
            return false;
        }
        match self.vad.is_voice_segment(&samples) {
            Ok(speech) => speech,
            Err(()) => {
                debug!("WebRTC VAD rejected frame");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "webrtc"
    }
}

/// RMS energy threshold
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        rms(&frame.samples()) > self.threshold
    }

    fn name(&self) -> &str {
        "energy"
    }
}

fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_threshold() {
        let mut classifier = EnergyClassifier::new(500.0);
        assert!(!classifier.is_speech(&AudioFrame::silence(320, 16000, 1)));
        assert!(classifier.is_speech(&AudioFrame::from_samples(&[2000; 160], 16000, 1)));
        assert!(!classifier.is_speech(&AudioFrame::from_samples(&[100; 160], 16000, 1)));
    }

    #[test]
    fn test_webrtc_rejects_unsupported_rate() {
        assert!(WebRtcClassifier::new(44100, 10, 0).is_err());
        assert!(WebRtcClassifier::new(16000, 25, 0).is_err());
        assert!(WebRtcClassifier::new(16000, 10, 4).is_err());
    }

    #[test]
    fn test_webrtc_silence_is_not_speech() {
        let mut classifier = WebRtcClassifier::new(16000, 10, 0).unwrap();
        assert!(!classifier.is_speech(&AudioFrame::silence(320, 16000, 1)));
    }
}
