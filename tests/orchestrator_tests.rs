// End-to-end dialogue tests: capture frames in, synthesis sessions out
//
// Capture is a plain channel, the speech classifier is the energy detector,
// synthesis runs against the in-memory provider and a background task
// drains the playback queue the way an output device would.

mod common;

use async_trait::async_trait;
use common::{eventually, input_config, silence_frame, speech_frame, within, ServerLog};
use futures::stream::{self, StreamExt};
use loqa_voice::audio::{AudioFrame, AudioStreamConfig, PlaybackQueue};
use loqa_voice::dialogue::{
    ActivityContext, GenerationChunk, GenerationStream, Orchestrator, Role, TextGenerator, ToolCall, Transcriber,
    Transcript, Turn,
};
use loqa_voice::endpoint::{EnergyClassifier, Endpointer};
use loqa_voice::providers::{EchoGenerator, FixedTranscriber, ToolRegistry};
use loqa_voice::synthesis::{Event, MemoryConnector, SynthesisConfig, SynthesisEngine};
use loqa_voice::{DialogueStats, VoiceError, VoiceResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SILENCE_THRESHOLD_MS: u64 = 100;

/// Speaks a reply, then keeps "thinking" until cancelled
struct EndlessGenerator;

#[async_trait]
impl TextGenerator for EndlessGenerator {
    async fn generate(&self, _transcript: &[Turn]) -> VoiceResult<GenerationStream> {
        let first = stream::iter(vec![Ok(GenerationChunk::Text("好的，".to_string()))]);
        Ok(first.chain(stream::pending()).boxed())
    }

    fn name(&self) -> &str {
        "endless"
    }
}

/// Asks for the timestamp tool once, then answers
struct ToolCallingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for ToolCallingGenerator {
    async fn generate(&self, transcript: &[Turn]) -> VoiceResult<GenerationStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answered = transcript.last().map(|t| t.role == Role::Tool).unwrap_or(false);
        let chunk = if answered {
            GenerationChunk::Text("现在的时间戳已经查到了。".to_string())
        } else {
            GenerationChunk::ToolCall(ToolCall {
                id: "call_1".to_string(),
                name: "get_timestamp".to_string(),
                arguments: "{}".to_string(),
            })
        };
        Ok(stream::iter(vec![Ok(chunk)]).boxed())
    }

    fn name(&self) -> &str {
        "tool-calling"
    }
}

/// Looks up the timestamp, starts answering, then keeps "thinking"
struct ToolThenEndlessGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for ToolThenEndlessGenerator {
    async fn generate(&self, transcript: &[Turn]) -> VoiceResult<GenerationStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if transcript.last().map(|t| t.role == Role::Tool).unwrap_or(false) {
            let first = stream::iter(vec![Ok(GenerationChunk::Text("我查一下，".to_string()))]);
            return Ok(first.chain(stream::pending()).boxed());
        }
        let call = GenerationChunk::ToolCall(ToolCall {
            id: "call_9".to_string(),
            name: "get_timestamp".to_string(),
            arguments: "{}".to_string(),
        });
        Ok(stream::iter(vec![Ok(call)]).boxed())
    }

    fn name(&self) -> &str {
        "tool-then-endless"
    }
}

/// Fails the first generation, echoes afterwards
struct FlakyGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for FlakyGenerator {
    async fn generate(&self, transcript: &[Turn]) -> VoiceResult<GenerationStream> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(VoiceError::Generation("model overloaded".to_string()));
        }
        EchoGenerator::new().generate(transcript).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Fails the first utterance, then hears `text`
struct FlakyTranscriber {
    calls: AtomicUsize,
    text: String,
}

impl Transcriber for FlakyTranscriber {
    fn transcribe(&self, _frames: &[AudioFrame]) -> VoiceResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(VoiceError::Transcription("upstream timeout".to_string()))
        } else {
            Ok(self.text.clone())
        }
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

struct Harness {
    orchestrator: Orchestrator,
    stats: Arc<Mutex<DialogueStats>>,
    log: ServerLog,
    playback: Arc<PlaybackQueue>,
    input: AudioStreamConfig,
}

fn harness(transcriber: Arc<dyn Transcriber>, generator: Arc<dyn TextGenerator>) -> Harness {
    let input = input_config();
    let output = AudioStreamConfig {
        sample_rate: 24000,
        ..AudioStreamConfig::default()
    };

    let (connector, server) = MemoryConnector::pair();
    // 20 ms of 24 kHz mono PCM per TaskRequest
    let log = common::spawn_tts_server(server, vec![1u8; 960]);
    let synthesis = Arc::new(SynthesisEngine::new(
        Arc::new(connector),
        SynthesisConfig::default().speech_params(),
    ));

    let playback = PlaybackQueue::new(output.frame_bytes());
    let tools = Arc::new(ToolRegistry::with_enabled(&["time".to_string()]).unwrap());
    let context = ActivityContext {
        generator,
        tools,
        synthesis,
        playback: playback.clone(),
        output,
        synthesis_rate: 24000,
        min_phrase_chars: 2,
        max_tool_rounds: 3,
    };
    let endpointer = Endpointer::new(
        Box::new(EnergyClassifier::new(500.0)),
        input.frame_bytes(),
        SILENCE_THRESHOLD_MS,
    );
    let orchestrator = Orchestrator::new(
        endpointer,
        transcriber,
        context,
        Transcript::with_system_prompt("Answer briefly."),
    );
    let stats = orchestrator.stats_handle();

    Harness {
        orchestrator,
        stats,
        log,
        playback,
        input,
    }
}

/// One utterance: a burst of speech closed by enough trailing silence
async fn speak(tx: &mpsc::Sender<AudioFrame>, input: &AudioStreamConfig) {
    for _ in 0..5 {
        tx.send(speech_frame(input)).await.unwrap();
    }
    for _ in 0..(SILENCE_THRESHOLD_MS / input.chunk_duration_ms as u64) {
        tx.send(silence_frame(input)).await.unwrap();
    }
}

fn stats(handle: &Arc<Mutex<DialogueStats>>) -> DialogueStats {
    handle.lock().clone()
}

fn assert_sessions_paired(log: &ServerLog) {
    let started = common::sessions(log, Event::StartSession);
    let finished = common::sessions(log, Event::FinishSession);
    assert_eq!(started, finished, "every StartSession is finished, in order");
}

#[tokio::test]
async fn test_reply_is_spoken_and_committed() {
    let Harness {
        mut orchestrator,
        stats: handle,
        log,
        playback,
        input,
    } = harness(Arc::new(FixedTranscriber::new("今天天气很好")), Arc::new(EchoGenerator::new()));
    let drain = common::spawn_playback_drain(playback.clone(), Duration::from_millis(1));

    let (tx, rx) = mpsc::channel(256);
    let shutdown = CancellationToken::new();
    let driver = async {
        speak(&tx, &input).await;
        eventually(|| stats(&handle).responses_completed == 1).await;
        shutdown.cancel();
    };
    let (transcript, ()) = within(async { tokio::join!(orchestrator.run(rx, shutdown.clone()), driver) }).await;
    drain.abort();

    let roles: Vec<Role> = transcript.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(transcript.turns()[1].content, "今天天气很好");
    assert_eq!(transcript.turns()[2].content, "今天天气很好");

    let spoken: String = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|r| r.text.clone())
        .collect();
    assert_eq!(spoken, "今天天气很好");
    assert_sessions_paired(&log);

    let final_stats = orchestrator.stats();
    assert_eq!(final_stats.utterances, 1);
    assert_eq!(final_stats.responses_started, 1);
    assert_eq!(final_stats.barge_ins, 0);
    assert_eq!(final_stats.failures, 0);
}

#[tokio::test]
async fn test_repeated_barge_in() {
    let Harness {
        mut orchestrator,
        stats: handle,
        log,
        playback,
        input,
    } = harness(Arc::new(FixedTranscriber::new("等一下")), Arc::new(EndlessGenerator));

    let (tx, rx) = mpsc::channel(256);
    let shutdown = CancellationToken::new();
    let driver = async {
        for round in 1..=4usize {
            speak(&tx, &input).await;
            // The reply is live once its synthesis session has started
            eventually(|| common::count(&log, Event::TaskRequest) == round).await;
            assert_eq!(stats(&handle).barge_ins as usize, round - 1);
        }
        shutdown.cancel();
    };
    let (transcript, ()) = within(async { tokio::join!(orchestrator.run(rx, shutdown.clone()), driver) }).await;

    let final_stats = orchestrator.stats();
    assert_eq!(final_stats.utterances, 4);
    assert_eq!(final_stats.responses_started, 4);
    assert_eq!(final_stats.responses_completed, 0);
    assert_eq!(final_stats.barge_ins, 3);

    // Interrupted replies leave no trace in the conversation
    let roles: Vec<Role> = transcript.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User, Role::User, Role::User]);
    assert!(playback.is_empty());

    // Cancellation finished each session before the next one started
    eventually(|| common::count(&log, Event::FinishSession) == 4).await;
    assert_sessions_paired(&log);
    let events: Vec<Event> = log
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.event)
        .filter(|e| matches!(e, Event::StartSession | Event::FinishSession))
        .collect();
    for pair in events.chunks(2) {
        assert_eq!(pair, [Event::StartSession, Event::FinishSession]);
    }
}

#[tokio::test]
async fn test_tool_round_trip() {
    let generator = Arc::new(ToolCallingGenerator {
        calls: AtomicUsize::new(0),
    });
    let Harness {
        mut orchestrator,
        stats: handle,
        playback,
        input,
        ..
    } = harness(Arc::new(FixedTranscriber::new("现在几点")), generator.clone());
    let drain = common::spawn_playback_drain(playback, Duration::from_millis(1));

    let (tx, rx) = mpsc::channel(256);
    let shutdown = CancellationToken::new();
    let driver = async {
        speak(&tx, &input).await;
        eventually(|| stats(&handle).responses_completed == 1).await;
        shutdown.cancel();
    };
    let (transcript, ()) = within(async { tokio::join!(orchestrator.run(rx, shutdown.clone()), driver) }).await;
    drain.abort();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    let turns = transcript.turns();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[2].role, Role::Tool);
    let tool = turns[2].tool.as_ref().unwrap();
    assert_eq!(tool.call_id, "call_1");
    assert_eq!(tool.name, "get_timestamp");
    assert!(turns[2].content.parse::<i64>().is_ok());
    assert_eq!(turns[3].role, Role::Assistant);
    assert_eq!(turns[3].content, "现在的时间戳已经查到了。");
}

#[tokio::test]
async fn test_barge_in_after_tool_round_commits_nothing() {
    let generator = Arc::new(ToolThenEndlessGenerator {
        calls: AtomicUsize::new(0),
    });
    let Harness {
        mut orchestrator,
        stats: handle,
        log,
        input,
        ..
    } = harness(Arc::new(FixedTranscriber::new("现在几点")), generator.clone());

    let (tx, rx) = mpsc::channel(256);
    let shutdown = CancellationToken::new();
    let driver = async {
        speak(&tx, &input).await;
        // The tool round is done once the answer starts being spoken
        eventually(|| common::count(&log, Event::TaskRequest) == 1).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);

        speak(&tx, &input).await;
        eventually(|| stats(&handle).barge_ins == 1).await;
        eventually(|| common::count(&log, Event::TaskRequest) == 2).await;
        shutdown.cancel();
    };
    let (transcript, ()) = within(async { tokio::join!(orchestrator.run(rx, shutdown.clone()), driver) }).await;

    // Neither the tool result nor the partial answer survives the interruption
    let roles: Vec<Role> = transcript.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User]);
    assert!(transcript.turns().iter().all(|t| t.tool.is_none()));

    let final_stats = orchestrator.stats();
    assert_eq!(final_stats.responses_started, 2);
    assert_eq!(final_stats.responses_completed, 0);
    eventually(|| common::count(&log, Event::FinishSession) == 2).await;
    assert_sessions_paired(&log);
}

#[tokio::test]
async fn test_failures_do_not_stop_the_loop() {
    let transcriber = Arc::new(FlakyTranscriber {
        calls: AtomicUsize::new(0),
        text: "你好".to_string(),
    });
    let generator = Arc::new(FlakyGenerator {
        calls: AtomicUsize::new(0),
    });
    let Harness {
        mut orchestrator,
        stats: handle,
        playback,
        input,
        ..
    } = harness(transcriber, generator);
    let drain = common::spawn_playback_drain(playback, Duration::from_millis(1));

    let (tx, rx) = mpsc::channel(256);
    let shutdown = CancellationToken::new();
    let driver = async {
        // Transcription fails
        speak(&tx, &input).await;
        eventually(|| stats(&handle).failures == 1).await;
        // Generation fails
        speak(&tx, &input).await;
        eventually(|| stats(&handle).failures == 2).await;
        // Third time works
        speak(&tx, &input).await;
        eventually(|| stats(&handle).responses_completed == 1).await;
        shutdown.cancel();
    };
    let (transcript, ()) = within(async { tokio::join!(orchestrator.run(rx, shutdown.clone()), driver) }).await;
    drain.abort();

    let roles: Vec<Role> = transcript.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User, Role::Assistant]);

    let final_stats = orchestrator.stats();
    assert_eq!(final_stats.utterances, 3);
    assert_eq!(final_stats.responses_started, 2);
    assert_eq!(final_stats.failures, 2);
}

#[tokio::test]
async fn test_closed_capture_lets_reply_finish() {
    let Harness {
        mut orchestrator,
        playback,
        input,
        log,
        ..
    } = harness(Arc::new(FixedTranscriber::new("再见")), Arc::new(EchoGenerator::new()));
    let drain = common::spawn_playback_drain(playback, Duration::from_millis(1));

    let (tx, rx) = mpsc::channel(256);
    speak(&tx, &input).await;
    drop(tx);

    let transcript = within(orchestrator.run(rx, CancellationToken::new())).await;
    drain.abort();

    let user = transcript.turns().iter().rev().find(|t| t.role == Role::User);
    assert_eq!(user.map(|t| t.content.as_str()), Some("再见"));
    assert_eq!(transcript.turns().last().map(|t| t.role), Some(Role::Assistant));
    assert_eq!(orchestrator.stats().responses_completed, 1);
    assert_sessions_paired(&log);
}
