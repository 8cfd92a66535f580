use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::activity::{ActivityContext, ActivityOutcome, ResponseActivity};
use super::collaborators::Transcriber;
use super::transcript::{Transcript, Turn};
use crate::audio::{AudioFrame, CaptureQueue, PlaybackQueue};
use crate::endpoint::{EndpointEvent, Endpointer};
use crate::error::VoiceError;

/// Counters describing the conversation so far
#[derive(Debug, Clone, Default, Serialize)]
pub struct DialogueStats {
    /// Utterances closed by the endpointer
    pub utterances: u64,
    pub responses_started: u64,
    pub responses_completed: u64,
    pub barge_ins: u64,
    /// Turns lost to transcription, generation, tool or synthesis errors
    pub failures: u64,
}

/// Top-level dialogue loop
///
/// Owns the transcript and at most one live response. Speech heard while a
/// response is live cancels it immediately (barge-in).
pub struct Orchestrator {
    endpointer: Endpointer,
    transcriber: Arc<dyn Transcriber>,
    context: Arc<ActivityContext>,
    transcript: Transcript,
    stats: Arc<Mutex<DialogueStats>>,
    live: Option<ResponseActivity>,
    next_id: u64,
}

impl Orchestrator {
    pub fn new(
        endpointer: Endpointer,
        transcriber: Arc<dyn Transcriber>,
        context: ActivityContext,
        transcript: Transcript,
    ) -> Self {
        Self {
            endpointer,
            transcriber,
            context: Arc::new(context),
            transcript,
            stats: Arc::new(Mutex::new(DialogueStats::default())),
            live: None,
            next_id: 1,
        }
    }

    /// Handle for reading statistics while `run` is in progress
    pub fn stats_handle(&self) -> Arc<Mutex<DialogueStats>> {
        self.stats.clone()
    }

    pub fn stats(&self) -> DialogueStats {
        self.stats.lock().clone()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    fn playback(&self) -> &Arc<PlaybackQueue> {
        &self.context.playback
    }

    /// Run until `shutdown` fires or the capture queue closes
    ///
    /// On shutdown a live response is cancelled; when capture closes it is
    /// allowed to finish.
    pub async fn run(&mut self, mut capture: CaptureQueue, shutdown: CancellationToken) -> Transcript {
        info!(
            "Dialogue loop started (classifier: {}, generator: {}, transcriber: {})",
            self.endpointer.classifier_name(),
            self.context.generator.name(),
            self.transcriber.name()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    if let Some(activity) = self.live.take() {
                        debug!("Shutdown: cancelling response {}", activity.id());
                        activity.cancel_and_wait().await;
                        self.playback().clear();
                    }
                    break;
                }
                outcome = wait_live(&mut self.live) => {
                    if let Some(activity) = self.live.take() {
                        self.settle(activity.id(), outcome);
                    }
                }
                frame = capture.recv() => match frame {
                    Some(frame) => self.on_frame(frame).await,
                    None => {
                        if let Some(mut activity) = self.live.take() {
                            debug!("Capture closed: letting response {} finish", activity.id());
                            let outcome = activity.wait().await;
                            self.settle(activity.id(), outcome);
                        }
                        break;
                    }
                },
            }
        }

        let stats = self.stats();
        info!(
            "Dialogue loop stopped: {} utterances, {} responses ({} completed), {} barge-ins, {} failures",
            stats.utterances,
            stats.responses_started,
            stats.responses_completed,
            stats.barge_ins,
            stats.failures
        );
        self.transcript.clone()
    }

    async fn on_frame(&mut self, frame: AudioFrame) {
        let decision = self.endpointer.process(frame);

        if self.live.is_some() {
            if decision.is_speech {
                if let Some(activity) = self.live.take() {
                    self.barge_in(activity).await;
                }
            }
            return;
        }

        if let Some(event) = decision.event {
            self.on_utterance(event).await;
        }
    }

    /// Cancel the live response and start listening fresh
    async fn barge_in(&mut self, activity: ResponseActivity) {
        let id = activity.id();
        info!("Barge-in: cancelling response {}", id);

        self.playback().clear();
        let outcome = activity.cancel_and_wait().await;
        // Frames enqueued before the cancellation landed
        self.playback().clear();
        self.endpointer.reset();
        self.stats.lock().barge_ins += 1;

        match outcome {
            ActivityOutcome::Cancelled => debug!("Response {} cancelled", id),
            ActivityOutcome::Completed { .. } => {
                debug!("Response {} completed before cancellation, reply dropped", id)
            }
            ActivityOutcome::Failed(e) => debug!("Response {} failed during cancellation: {}", id, e),
        }
    }

    async fn on_utterance(&mut self, event: EndpointEvent) {
        self.stats.lock().utterances += 1;
        info!(
            "Utterance complete: {} frames, {}ms",
            event.frames.len(),
            event.duration_ms()
        );

        let transcriber = self.transcriber.clone();
        let frames = event.frames;
        let text = match tokio::task::spawn_blocking(move || transcriber.transcribe(&frames)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                self.record_failure(&e);
                return;
            }
            Err(e) => {
                self.record_failure(&VoiceError::Transcription(format!("transcription task failed: {}", e)));
                return;
            }
        };

        let text = text.trim();
        if text.is_empty() {
            debug!("Empty transcription, ignoring utterance");
            return;
        }
        info!("User: {}", text);
        self.commit(Turn::user(text));
        self.start_response();
    }

    fn start_response(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        self.stats.lock().responses_started += 1;
        debug!("Starting response {}", id);
        self.live = Some(ResponseActivity::spawn(
            id,
            self.context.clone(),
            self.transcript.snapshot(),
        ));
    }

    /// Commit the outcome of a response that ran to its end
    fn settle(&mut self, id: u64, outcome: ActivityOutcome) {
        match outcome {
            ActivityOutcome::Completed { reply, tool_turns } => {
                for turn in tool_turns {
                    self.commit(turn);
                }
                info!("Assistant: {}", reply);
                self.commit(Turn::assistant(reply));
                self.stats.lock().responses_completed += 1;
            }
            ActivityOutcome::Cancelled => debug!("Response {} ended cancelled", id),
            ActivityOutcome::Failed(e) => self.record_failure(&e),
        }
    }

    fn record_failure(&mut self, error: &VoiceError) {
        warn!("Turn failed: {}", error);
        self.stats.lock().failures += 1;
    }

    /// The only place turns enter the transcript
    fn commit(&mut self, turn: Turn) {
        self.transcript.commit(turn);
    }
}

async fn wait_live(live: &mut Option<ResponseActivity>) -> ActivityOutcome {
    match live {
        Some(activity) => activity.wait().await,
        None => std::future::pending().await,
    }
}
