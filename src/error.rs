//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur anywhere between the microphone and the speaker
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("No {direction} audio device matches \"{pattern}\"")]
    DeviceNotFound {
        direction: &'static str,
        pattern: String,
    },

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Synthesis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Synthesis session {session_id} failed: {detail}")]
    SessionFailed { session_id: String, detail: String },

    #[error("Synthesis server error {code}: {message}")]
    ServerError { code: i32, message: String },

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl VoiceError {
    /// Whether the synthesis connection is unusable after this error and must
    /// be reopened before the next session.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::Protocol(_)
                | VoiceError::MalformedFrame(_)
                | VoiceError::ConnectionFailed(_)
                | VoiceError::ServerError { .. }
                | VoiceError::Io(_)
        )
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PauseStreamError> for VoiceError {
    fn from(err: cpal::PauseStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Protocol(err.to_string())
    }
}
