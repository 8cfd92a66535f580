//! OpenAI-compatible transcription and chat completion providers

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::sse::{parse_sse_line, SseEvent, ToolCallAssembler};
use super::{endpoint, GenerationConfig, TranscriptionConfig};
use crate::audio::{AudioFile, AudioFrame};
use crate::dialogue::{
    GenerationChunk, GenerationStream, Role, TextGenerator, ToolBroker, ToolDefinition, Transcriber, Turn,
};
use crate::error::{VoiceError, VoiceResult};

/// Uploads each utterance as WAV to `/audio/transcriptions`
///
/// The HTTP client is blocking and built on first use, which happens on a
/// blocking worker thread.
pub struct OpenAiTranscriber {
    config: TranscriptionConfig,
    client: OnceLock<reqwest::blocking::Client>,
}

impl OpenAiTranscriber {
    pub fn new(config: TranscriptionConfig) -> VoiceResult<Self> {
        if config.api_key.is_empty() {
            warn!("Transcription API key is empty, requests will likely be rejected");
        }
        Ok(Self {
            config,
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> VoiceResult<&reqwest::blocking::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Transcriber for OpenAiTranscriber {
    fn transcribe(&self, frames: &[AudioFrame]) -> VoiceResult<String> {
        if frames.is_empty() {
            return Ok(String::new());
        }
        let audio = AudioFile::from_frames(frames);
        let wav = audio.to_wav_bytes()?;
        let url = endpoint(&self.config.base_url, "audio/transcriptions");
        debug!("Uploading {:.2}s of audio to {}", audio.duration_seconds, url);

        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        let mut form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone());
        if !self.config.language.is_empty() {
            form = form.text("language", self.config.language.clone());
        }

        let response = self
            .client()?
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(VoiceError::Transcription(format!("HTTP {}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .map_err(|e| VoiceError::Transcription(e.to_string()))?;
        Ok(body
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Streaming chat completions with function calling
pub struct OpenAiGenerator {
    config: GenerationConfig,
    tools: Vec<ToolDefinition>,
    http: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: GenerationConfig, broker: Arc<dyn ToolBroker>) -> VoiceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        let tools = broker.definitions();
        info!(
            "Chat generator ready: model {}, {} tools advertised",
            config.model,
            tools.len()
        );
        Ok(Self { config, tools, http })
    }

    fn request_body(&self, transcript: &[Turn]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages(transcript),
            "temperature": self.config.temperature,
            "stream": true,
        });
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(
                self.tools
                    .iter()
                    .map(|tool| json!({"type": "function", "function": tool}))
                    .collect(),
            );
        }
        body
    }
}

/// Chat messages for a transcript
///
/// A tool turn expands to the assistant message that requested the call
/// followed by the tool's answer.
pub fn messages(transcript: &[Turn]) -> Vec<Value> {
    let mut out = Vec::with_capacity(transcript.len());
    for turn in transcript {
        match (&turn.role, &turn.tool) {
            (Role::Tool, Some(tool)) => {
                out.push(json!({
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": tool.call_id,
                        "type": "function",
                        "function": {"name": tool.name, "arguments": tool.arguments},
                    }],
                }));
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool.call_id,
                    "content": turn.content,
                }));
            }
            (Role::Tool, None) => warn!("Skipping tool turn without call metadata"),
            (role, _) => out.push(json!({"role": role, "content": turn.content})),
        }
    }
    out
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, transcript: &[Turn]) -> VoiceResult<GenerationStream> {
        let url = endpoint(&self.config.base_url, "chat/completions");
        debug!("Requesting completion over {} turns", transcript.len());

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Accept", "text/event-stream")
            .json(&self.request_body(transcript))
            .send()
            .await
            .map_err(|e| VoiceError::Generation(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!("HTTP {}: {}", status, body)));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_events(response.bytes_stream(), tx));
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// How one stream line left the pump
enum LineEnd {
    Continue,
    Done,
    /// The receiver is gone
    Closed,
}

/// Read the event stream into generation chunks
///
/// Bytes are buffered until a full line is available, so a multibyte
/// character split across network chunks decodes intact. Text goes out as
/// it arrives; tool calls are released once the stream ends. Stops early
/// when the receiver is dropped.
async fn pump_events<S, B, E>(bytes: S, tx: mpsc::Sender<VoiceResult<GenerationChunk>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let mut calls = ToolCallAssembler::new();

    'read: while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(Err(VoiceError::Generation(format!("stream read error: {}", e))))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            match forward_line(&line, &mut calls, &tx).await {
                LineEnd::Continue => {}
                LineEnd::Done => break 'read,
                LineEnd::Closed => return,
            }
        }
    }

    // A final line without a trailing newline
    if !buffer.is_empty() {
        if let LineEnd::Closed = forward_line(&buffer, &mut calls, &tx).await {
            return;
        }
    }

    for call in calls.finish() {
        debug!("Model requested tool {} ({})", call.name, call.id);
        if tx.send(Ok(GenerationChunk::ToolCall(call))).await.is_err() {
            return;
        }
    }
}

async fn forward_line(
    line: &[u8],
    calls: &mut ToolCallAssembler,
    tx: &mpsc::Sender<VoiceResult<GenerationChunk>>,
) -> LineEnd {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            warn!("Skipping stream line that is not UTF-8: {}", e);
            return LineEnd::Continue;
        }
    };
    let events = match parse_sse_line(line) {
        Ok(events) => events,
        Err(e) => {
            warn!("Skipping stream line: {}", e);
            return LineEnd::Continue;
        }
    };

    for event in events {
        match event {
            SseEvent::Text(text) => {
                if tx.send(Ok(GenerationChunk::Text(text))).await.is_err() {
                    return LineEnd::Closed;
                }
            }
            SseEvent::ToolDelta {
                index,
                id,
                name,
                arguments,
            } => calls.push(index, id, name, arguments),
            SseEvent::Done => return LineEnd::Done,
        }
    }
    LineEnd::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::ToolMetadata;

    #[test]
    fn test_messages_expand_tool_turns() {
        let transcript = vec![
            Turn::system("be brief"),
            Turn::user("几点了"),
            Turn::tool(
                ToolMetadata {
                    call_id: "call_7".to_string(),
                    name: "get_current_time".to_string(),
                    arguments: "{}".to_string(),
                },
                "2024-05-01 12:00:00",
            ),
        ];

        let out = messages(&transcript);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0]["role"], "system");
        assert_eq!(out[1]["content"], "几点了");
        assert_eq!(out[2]["role"], "assistant");
        assert_eq!(out[2]["tool_calls"][0]["function"]["name"], "get_current_time");
        assert_eq!(out[3]["role"], "tool");
        assert_eq!(out[3]["tool_call_id"], "call_7");
    }

    /// Run `pieces` through the pump as separate network chunks
    async fn pump(pieces: Vec<Vec<u8>>) -> Vec<GenerationChunk> {
        let (tx, mut rx) = mpsc::channel(64);
        let body = futures::stream::iter(pieces.into_iter().map(Ok::<_, std::io::Error>));
        pump_events(body, tx).await;

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk.unwrap());
        }
        out
    }

    fn text_of(chunks: &[GenerationChunk]) -> String {
        chunks
            .iter()
            .filter_map(|c| match c {
                GenerationChunk::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_multibyte_text_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n".as_bytes();
        let split = body.iter().position(|&b| b == 0xe4).unwrap() + 1;

        let chunks = pump(vec![body[..split].to_vec(), body[split..].to_vec()]).await;
        assert_eq!(chunks, vec![GenerationChunk::Text("你好".to_string())]);
    }

    #[tokio::test]
    async fn test_byte_at_a_time_delivery_keeps_text_intact() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"今天天气\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"不错。\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        );
        let pieces: Vec<Vec<u8>> = body.as_bytes().iter().map(|&b| vec![b]).collect();

        let chunks = pump(pieces).await;
        assert_eq!(text_of(&chunks), "今天天气不错。");
    }

    #[tokio::test]
    async fn test_tool_call_released_after_last_line_without_newline() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",",
            "\"function\":{\"name\":\"get_timestamp\",\"arguments\":\"\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
            "\"function\":{\"arguments\":\"{}\"}}]}}]}",
        );
        let (head, tail) = body.as_bytes().split_at(body.len() / 2);

        let chunks = pump(vec![head.to_vec(), tail.to_vec()]).await;
        assert_eq!(chunks.len(), 1);
        let GenerationChunk::ToolCall(call) = &chunks[0] else {
            panic!("expected a tool call, got {:?}", chunks[0]);
        };
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "get_timestamp");
        assert_eq!(call.arguments, "{}");
    }

    #[tokio::test]
    async fn test_read_error_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let body = futures::stream::iter(vec![Err::<Vec<u8>, _>(std::io::Error::other("reset"))]);
        pump_events(body, tx).await;
        assert!(matches!(rx.recv().await, Some(Err(VoiceError::Generation(_)))));
    }

    #[tokio::test]
    async fn test_request_body_advertises_tools() {
        let registry = Arc::new(crate::providers::ToolRegistry::with_enabled(&["time".to_string()]).unwrap());
        let generator = OpenAiGenerator::new(GenerationConfig::default(), registry).unwrap();

        let body = generator.request_body(&[Turn::user("hi")]);
        assert_eq!(body["stream"], true);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["type"], "function");
    }

    #[tokio::test]
    async fn test_request_body_without_tools() {
        let registry = Arc::new(crate::providers::ToolRegistry::new());
        let generator = OpenAiGenerator::new(GenerationConfig::default(), registry).unwrap();
        assert!(generator.request_body(&[]).get("tools").is_none());
    }
}
