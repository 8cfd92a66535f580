//! Streaming speech synthesis over the provider's bidirectional protocol

pub mod engine;
pub mod protocol;
pub mod transport;

pub use engine::{SessionReport, SessionState, SynthesisEngine, SynthesisStream};
pub use protocol::{Event, Frame, MessageType, SpeechParams};
pub use transport::{Connector, MemoryConnector, MemoryServer, ServerConnection, WebSocketConnector};

use serde::Deserialize;

/// Synthesis provider configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// WebSocket endpoint
    pub url: String,
    pub app_id: String,
    pub access_token: String,
    pub resource_id: String,
    /// Voice identifier
    pub speaker: String,
    /// Audio encoding requested from the provider (playback needs "pcm")
    pub audio_format: String,
    /// Sample rate of the synthesized audio
    pub sample_rate: u32,
    /// Speed adjustment, 0 is normal
    pub speech_rate: i32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            url: "wss://openspeech.bytedance.com/api/v3/tts/bidirection".to_string(),
            app_id: String::new(),
            access_token: String::new(),
            resource_id: "volc.service_type.10029".to_string(),
            speaker: "zh_female_wanwanxiaohe_moon_bigtts".to_string(),
            audio_format: "pcm".to_string(),
            sample_rate: 24000,
            speech_rate: 0,
        }
    }
}

impl SynthesisConfig {
    pub fn speech_params(&self) -> SpeechParams {
        SpeechParams {
            speaker: self.speaker.clone(),
            format: self.audio_format.clone(),
            sample_rate: self.sample_rate,
            speech_rate: self.speech_rate,
        }
    }
}
