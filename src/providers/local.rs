//! Offline collaborators for demos and tests

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::audio::AudioFrame;
use crate::dialogue::{GenerationChunk, GenerationStream, Role, TextGenerator, Transcriber, Turn};
use crate::error::VoiceResult;

/// Returns the same text for every utterance
pub struct FixedTranscriber {
    text: String,
}

impl FixedTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Transcriber for FixedTranscriber {
    fn transcribe(&self, _frames: &[AudioFrame]) -> VoiceResult<String> {
        Ok(self.text.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Streams the last user turn back, a few characters at a time
pub struct EchoGenerator {
    chunk_chars: usize,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self { chunk_chars: 4 }
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, transcript: &[Turn]) -> VoiceResult<GenerationStream> {
        let text = transcript
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.clone())
            .unwrap_or_default();

        let chars: Vec<char> = text.chars().collect();
        let chunks: Vec<VoiceResult<GenerationChunk>> = chars
            .chunks(self.chunk_chars)
            .map(|piece| Ok(GenerationChunk::Text(piece.iter().collect())))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    fn name(&self) -> &str {
        "echo"
    }
}
