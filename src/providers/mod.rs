//! Concrete transcribers, generators and tools

pub mod local;
pub mod openai;
pub mod sse;
pub mod tools;

pub use local::{EchoGenerator, FixedTranscriber};
pub use openai::{OpenAiGenerator, OpenAiTranscriber};
pub use tools::{TimeTool, Tool, ToolRegistry};

use serde::Deserialize;

/// Speech-to-text provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Registered transcriber name ("openai" or "fixed")
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// ISO-639-1 hint, empty lets the provider detect
    pub language: String,
    /// Text returned by the "fixed" transcriber
    pub fixed_text: String,
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            language: "zh".to_string(),
            fixed_text: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Text generation provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Registered generator name ("openai" or "echo")
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub system_prompt: String,
    /// Characters buffered before a phrase goes to synthesis
    pub min_phrase_chars: usize,
    /// Tool rounds allowed per response
    pub max_tool_rounds: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            system_prompt: "You are a helpful voice assistant. Keep answers short and conversational."
                .to_string(),
            min_phrase_chars: 2,
            max_tool_rounds: 3,
            timeout_secs: 60,
        }
    }
}

/// Tools advertised to the generator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["time".to_string()],
        }
    }
}

/// Join a base URL and an endpoint path with exactly one slash
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
