use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::collaborators::{GenerationChunk, TextGenerator, ToolBroker, ToolCall};
use super::phrase::PhraseSegmenter;
use super::transcript::{ToolMetadata, Turn};
use crate::audio::{AudioStreamConfig, FrameAssembler, PlaybackQueue, Resampler};
use crate::error::{VoiceError, VoiceResult};
use crate::synthesis::{SynthesisEngine, SynthesisStream};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Shared collaborators for every response
pub struct ActivityContext {
    pub generator: Arc<dyn TextGenerator>,
    pub tools: Arc<dyn ToolBroker>,
    pub synthesis: Arc<SynthesisEngine>,
    pub playback: Arc<PlaybackQueue>,
    /// Playback stream format
    pub output: AudioStreamConfig,
    /// Rate of the PCM the synthesis provider returns
    pub synthesis_rate: u32,
    pub min_phrase_chars: usize,
    /// Generation rounds allowed to request tools before giving up
    pub max_tool_rounds: usize,
}

#[derive(Debug)]
pub enum ActivityOutcome {
    Completed { reply: String, tool_turns: Vec<Turn> },
    Cancelled,
    Failed(VoiceError),
}

/// One cancellable reply: generation, synthesis and playback
pub struct ResponseActivity {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<ActivityOutcome>,
}

impl ResponseActivity {
    pub fn spawn(id: u64, context: Arc<ActivityContext>, transcript: Arc<[Turn]>) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(context, transcript, cancel.clone()));
        Self { id, cancel, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the activity; must not be called again once it returns
    pub async fn wait(&mut self) -> ActivityOutcome {
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) => ActivityOutcome::Failed(VoiceError::Generation(format!(
                "response task failed: {}",
                e
            ))),
        }
    }

    /// Cancel and wait for the acknowledgement (FinishSession sent)
    pub async fn cancel_and_wait(mut self) -> ActivityOutcome {
        self.cancel();
        self.wait().await
    }
}

async fn run(context: Arc<ActivityContext>, transcript: Arc<[Turn]>, cancel: CancellationToken) -> ActivityOutcome {
    let halt = cancel.child_token();
    let (text_tx, text_rx) = mpsc::unbounded_channel::<String>();
    let stream = context
        .synthesis
        .synthesize(UnboundedReceiverStream::new(text_rx), halt.clone());
    debug!("Response started, synthesis session {}", stream.session_id());

    let (generated, played) = tokio::join!(
        generate(&context, transcript, text_tx, &halt),
        play(&context, stream, &halt)
    );

    if cancel.is_cancelled() {
        return ActivityOutcome::Cancelled;
    }
    match (generated, played) {
        (Ok((reply, tool_turns)), Ok(())) => ActivityOutcome::Completed { reply, tool_turns },
        (_, Err(e)) | (Err(e), Ok(())) => ActivityOutcome::Failed(e),
    }
}

/// Generation pump with the tool sub-loop
///
/// Phrases go to `text_tx`; dropping it ends the synthesis text stream.
async fn generate(
    context: &ActivityContext,
    transcript: Arc<[Turn]>,
    text_tx: mpsc::UnboundedSender<String>,
    halt: &CancellationToken,
) -> VoiceResult<(String, Vec<Turn>)> {
    let result = generate_rounds(context, transcript, &text_tx, halt).await;
    if let Err(e) = &result {
        if !matches!(e, VoiceError::Cancelled) {
            warn!("Generation failed: {}", e);
        }
        halt.cancel();
    }
    result
}

async fn generate_rounds(
    context: &ActivityContext,
    transcript: Arc<[Turn]>,
    text_tx: &mpsc::UnboundedSender<String>,
    halt: &CancellationToken,
) -> VoiceResult<(String, Vec<Turn>)> {
    let mut history: Vec<Turn> = transcript.to_vec();
    let mut tool_turns = Vec::new();
    let mut reply = String::new();
    let mut segmenter = PhraseSegmenter::new(context.min_phrase_chars);

    for round in 0..=context.max_tool_rounds {
        let mut stream = tokio::select! {
            biased;
            _ = halt.cancelled() => return Err(VoiceError::Cancelled),
            stream = context.generator.generate(&history) => stream?,
        };

        let mut calls: Vec<ToolCall> = Vec::new();
        loop {
            let item = tokio::select! {
                biased;
                _ = halt.cancelled() => return Err(VoiceError::Cancelled),
                item = stream.next() => item,
            };
            match item {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(GenerationChunk::Text(text))) => {
                    reply.push_str(&text);
                    if let Some(phrase) = segmenter.push(&text) {
                        forward(text_tx, phrase)?;
                    }
                }
                Some(Ok(GenerationChunk::ToolCall(call))) => calls.push(call),
            }
        }

        if calls.is_empty() {
            break;
        }
        if round == context.max_tool_rounds {
            warn!("Tool round limit ({}) reached, ignoring {} calls", round, calls.len());
            break;
        }

        for call in calls {
            let result = execute_tool(context.tools.clone(), &call).await?;
            let turn = Turn::tool(
                ToolMetadata {
                    call_id: call.id,
                    name: call.name,
                    arguments: call.arguments,
                },
                result,
            );
            history.push(turn.clone());
            tool_turns.push(turn);
        }
    }

    if let Some(phrase) = segmenter.finish() {
        forward(text_tx, phrase)?;
    }
    Ok((reply, tool_turns))
}

/// Hand a phrase to synthesis; fails once the session has stopped taking text
fn forward(text_tx: &mpsc::UnboundedSender<String>, phrase: String) -> VoiceResult<()> {
    text_tx
        .send(phrase)
        .map_err(|_| VoiceError::Protocol("synthesis session ended before the reply was sent".to_string()))
}

async fn execute_tool(tools: Arc<dyn ToolBroker>, call: &ToolCall) -> VoiceResult<String> {
    let name = call.name.clone();
    let arguments = call.arguments.clone();
    info!("Executing tool {} ({})", name, arguments);

    let result = tokio::task::spawn_blocking(move || tools.execute(&name, &arguments))
        .await
        .map_err(|e| VoiceError::Tool(format!("tool task failed: {}", e)))??;
    debug!("Tool {} returned {} bytes", call.name, result.len());
    Ok(result)
}

/// Converts provider PCM (mono, 16-bit LE) to the playback format
struct PcmConverter {
    resampler: Resampler,
    channels: usize,
    carry: Option<u8>,
}

impl PcmConverter {
    fn new(from_rate: u32, output: &AudioStreamConfig) -> Self {
        Self {
            resampler: Resampler::new(from_rate, output.sample_rate),
            channels: output.channels.max(1) as usize,
            carry: None,
        }
    }

    fn convert(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut joined;
        let mut input = bytes;
        if let Some(first) = self.carry.take() {
            joined = Vec::with_capacity(bytes.len() + 1);
            joined.push(first);
            joined.extend_from_slice(bytes);
            input = &joined;
        }
        if input.len() % 2 == 1 {
            self.carry = input.last().copied();
            input = &input[..input.len() - 1];
        }
        let samples: Vec<i16> = input
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let resampled = self.resampler.process(&samples);
        self.encode(resampled)
    }

    fn flush(&mut self) -> Vec<u8> {
        self.carry = None;
        let tail = self.resampler.flush();
        self.encode(tail)
    }

    fn encode(&self, samples: Vec<i16>) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|s| std::iter::repeat(s.to_le_bytes()).take(self.channels))
            .flatten()
            .collect()
    }
}

/// Playback pump: synthesis audio into the playback queue
///
/// Returns once the session ended and the queue drained, or on `halt`.
async fn play(context: &ActivityContext, mut stream: SynthesisStream, halt: &CancellationToken) -> VoiceResult<()> {
    let result = pump_audio(context, &mut stream, halt).await;

    // The session task sends FinishSession before this resolves
    match stream.finish().await {
        Ok(report) => debug!(
            "Synthesis session {} ended as {:?} ({} audio chunks, {} stale frames)",
            report.session_id, report.state, report.audio_chunks, report.stale_frames
        ),
        Err(e) => warn!("Synthesis task lost: {}", e),
    }

    if result.is_err() {
        halt.cancel();
    }
    result
}

async fn pump_audio(context: &ActivityContext, stream: &mut SynthesisStream, halt: &CancellationToken) -> VoiceResult<()> {
    let output = &context.output;
    let mut converter = PcmConverter::new(context.synthesis_rate, output);
    let mut assembler = FrameAssembler::new(output.frame_bytes(), output.sample_rate, output.channels);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = halt.cancelled() => return Ok(()),
            chunk = stream.next_chunk() => chunk,
        };
        match chunk {
            None => break,
            Some(Err(e)) => return Err(e),
            Some(Ok(bytes)) => {
                for frame in assembler.push(&converter.convert(&bytes)) {
                    context.playback.enqueue(frame);
                }
            }
        }
    }

    for frame in assembler.push(&converter.flush()) {
        context.playback.enqueue(frame);
    }
    if let Some(frame) = assembler.flush() {
        context.playback.enqueue(frame);
    }

    // Stay live while the reply is audible so speech still counts as barge-in
    while !context.playback.is_empty() {
        tokio::select! {
            biased;
            _ = halt.cancelled() => return Ok(()),
            _ = tokio::time::sleep(DRAIN_POLL) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{EchoGenerator, ToolRegistry};
    use crate::synthesis::{MemoryConnector, SynthesisConfig};

    fn context() -> ActivityContext {
        let (connector, _server) = MemoryConnector::pair();
        let output = AudioStreamConfig::default();
        ActivityContext {
            generator: Arc::new(EchoGenerator::new()),
            tools: Arc::new(ToolRegistry::new()),
            synthesis: Arc::new(SynthesisEngine::new(
                Arc::new(connector),
                SynthesisConfig::default().speech_params(),
            )),
            playback: PlaybackQueue::new(output.frame_bytes()),
            output,
            synthesis_rate: 24000,
            min_phrase_chars: 2,
            max_tool_rounds: 3,
        }
    }

    #[tokio::test]
    async fn test_generation_stops_when_synthesis_stops_taking_text() {
        let context = context();
        let (text_tx, text_rx) = mpsc::unbounded_channel::<String>();
        drop(text_rx);

        let transcript: Arc<[Turn]> = vec![Turn::user("你好，今天天气不错。")].into();
        let result = generate_rounds(&context, transcript, &text_tx, &CancellationToken::new()).await;
        assert!(matches!(result, Err(VoiceError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_generation_forwards_phrases() {
        let context = context();
        let (text_tx, mut text_rx) = mpsc::unbounded_channel::<String>();

        let transcript: Arc<[Turn]> = vec![Turn::user("你好，世界")].into();
        let (reply, tool_turns) = generate_rounds(&context, transcript, &text_tx, &CancellationToken::new())
            .await
            .unwrap();
        drop(text_tx);

        let mut phrases = Vec::new();
        while let Some(phrase) = text_rx.recv().await {
            phrases.push(phrase);
        }
        assert_eq!(reply, "你好，世界");
        assert_eq!(phrases.concat(), "你好，世界");
        assert!(tool_turns.is_empty());
        assert!(context.playback.is_empty());
    }

    fn output(rate: u32, channels: u16) -> AudioStreamConfig {
        AudioStreamConfig {
            sample_rate: rate,
            channels,
            ..AudioStreamConfig::default()
        }
    }

    #[test]
    fn test_converter_carries_odd_byte() {
        let mut converter = PcmConverter::new(24000, &output(24000, 1));
        let first = converter.convert(&[0x01, 0x02, 0x03]);
        assert_eq!(first, vec![0x01, 0x02]);
        let second = converter.convert(&[0x04]);
        assert_eq!(second, vec![0x03, 0x04]);
        assert!(converter.flush().is_empty());
    }

    #[test]
    fn test_converter_duplicates_for_stereo() {
        let mut converter = PcmConverter::new(24000, &output(24000, 2));
        let out = converter.convert(&7i16.to_le_bytes());
        assert_eq!(out, [7i16.to_le_bytes(), 7i16.to_le_bytes()].concat());
    }

    #[test]
    fn test_converter_resamples() {
        let mut converter = PcmConverter::new(24000, &output(48000, 1));
        let bytes: Vec<u8> = vec![0i16; 240].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut total = converter.convert(&bytes).len();
        total += converter.flush().len();
        assert_eq!(total, 480 * 2);
    }
}
