//! Seams to the external engines the orchestrator drives

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use super::transcript::Turn;
use crate::audio::AudioFrame;
use crate::error::VoiceResult;

/// Speech to text
///
/// Blocking; the orchestrator calls it from a blocking worker thread.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, frames: &[AudioFrame]) -> VoiceResult<String>;

    fn name(&self) -> &str;
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON text
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationChunk {
    Text(String),
    ToolCall(ToolCall),
}

pub type GenerationStream = BoxStream<'static, VoiceResult<GenerationChunk>>;

/// Streaming text generation over the conversation so far
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, transcript: &[Turn]) -> VoiceResult<GenerationStream>;

    fn name(&self) -> &str;
}

/// Advertised tool signature
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Executes model-requested functions (blocking)
pub trait ToolBroker: Send + Sync {
    fn execute(&self, name: &str, arguments: &str) -> VoiceResult<String>;

    fn definitions(&self) -> Vec<ToolDefinition>;
}
