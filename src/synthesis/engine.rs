use futures::stream::BoxStream;
use futures::{SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{decode, encode, request_payload, Event, Frame, MessageType, SpeechParams};
use super::transport::{Connector, FrameSink, FrameSource};
use crate::error::{VoiceError, VoiceResult};

/// Lifecycle of one synthesis session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// StartSession sent, waiting for SessionStarted
    Starting,
    Started,
    /// At least one TaskRequest sent
    Streaming,
    /// FinishSession sent, SessionFinished not yet seen
    Finishing,
    Finished,
    Failed,
}

/// Summary of a completed session task
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub state: SessionState,
    pub finish_sent: bool,
    pub cancelled: bool,
    pub text_chunks: usize,
    pub audio_chunks: usize,
    /// Frames discarded while waiting for SessionStarted
    pub stale_frames: usize,
}

struct Connection {
    sink: FrameSink,
    source: FrameSource,
}

impl Connection {
    async fn send(&mut self, frame: &Frame) -> VoiceResult<()> {
        self.sink.send(encode(frame)?).await
    }
}

/// Next frame from the provider; a closed stream is a transport failure
async fn next_frame(source: &mut FrameSource) -> VoiceResult<Frame> {
    match source.next().await {
        Some(bytes) => decode(&bytes?),
        None => Err(VoiceError::ConnectionFailed(
            "connection closed by provider".to_string(),
        )),
    }
}

/// Streaming speech synthesis over one persistent provider connection
///
/// The connection is opened lazily and reused across sessions. Sessions are
/// serialized: a session task holds the connection for its whole lifetime,
/// so a new `synthesize` call waits until the previous session has sent its
/// FinishSession.
pub struct SynthesisEngine {
    connector: Arc<dyn Connector>,
    params: SpeechParams,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl SynthesisEngine {
    pub fn new(connector: Arc<dyn Connector>, params: SpeechParams) -> Self {
        Self {
            connector,
            params,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn params(&self) -> &SpeechParams {
        &self.params
    }

    pub async fn is_open(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Open the connection and complete the handshake; no-op when open
    pub async fn open(&self) -> VoiceResult<()> {
        let mut guard = self.connection.lock().await;
        ensure_open(&mut guard, self.connector.as_ref()).await
    }

    /// Send FinishConnection and drop the transport; no-op when not open
    pub async fn close(&self) -> VoiceResult<()> {
        let mut guard = self.connection.lock().await;
        let Some(mut connection) = guard.take() else {
            return Ok(());
        };

        connection.send(&Frame::finish_connection()).await?;
        let closing = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                match next_frame(&mut connection.source).await {
                    Ok(frame) if frame.event == Some(Event::ConnectionFinished) => break,
                    Ok(frame) => debug!("Discarding {:?} while closing", frame.event),
                    Err(_) => break,
                }
            }
        })
        .await;
        if closing.is_err() {
            debug!("No ConnectionFinished before timeout");
        }
        let _ = connection.sink.close().await;
        info!("Synthesis connection closed");
        Ok(())
    }

    /// Start a session fed by `text`, returning the audio as it arrives
    ///
    /// Cancelling `cancel` stops further TaskRequests at once and tears the
    /// receiver down; FinishSession is still sent. Dropping the returned
    /// stream has the same effect.
    pub fn synthesize<S>(&self, text: S, cancel: CancellationToken) -> SynthesisStream
    where
        S: Stream<Item = String> + Send + 'static,
    {
        let session_id = Uuid::new_v4().simple().to_string();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let session = SessionTask {
            connection: self.connection.clone(),
            connector: self.connector.clone(),
            params: self.params.clone(),
            session_id: session_id.clone(),
            audio_tx,
            state_tx,
        };
        let task = tokio::spawn(session.run(text.boxed(), cancel));

        SynthesisStream {
            session_id,
            audio: audio_rx,
            state: state_rx,
            task,
        }
    }
}

async fn handshake(connector: &dyn Connector) -> VoiceResult<Connection> {
    let (sink, source) = connector.connect().await?;
    let mut connection = Connection { sink, source };
    connection.send(&Frame::start_connection()).await?;

    let frame = next_frame(&mut connection.source).await?;
    match (frame.message_type, frame.event) {
        (_, Some(Event::ConnectionStarted)) => {
            info!("Synthesis connection started ({})", frame.payload_text());
            Ok(connection)
        }
        (_, Some(Event::ConnectionFailed)) => Err(VoiceError::ConnectionFailed(frame.payload_text())),
        (MessageType::ErrorInfo, _) => Err(VoiceError::ServerError {
            code: frame.error_code.unwrap_or(0),
            message: frame.payload_text(),
        }),
        (_, event) => Err(VoiceError::Protocol(format!(
            "expected ConnectionStarted, got {:?}",
            event
        ))),
    }
}

async fn ensure_open(slot: &mut Option<Connection>, connector: &dyn Connector) -> VoiceResult<()> {
    if slot.is_none() {
        *slot = Some(handshake(connector).await?);
    }
    Ok(())
}

/// How the receiver half stopped
enum ReceiveEnd {
    Finished,
    Cancelled,
    /// The audio consumer went away
    Abandoned,
}

struct SessionTask {
    connection: Arc<Mutex<Option<Connection>>>,
    connector: Arc<dyn Connector>,
    params: SpeechParams,
    session_id: String,
    audio_tx: mpsc::UnboundedSender<VoiceResult<Vec<u8>>>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionTask {
    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    async fn run(self, text: BoxStream<'static, String>, cancel: CancellationToken) -> SessionReport {
        let mut guard: OwnedMutexGuard<Option<Connection>> = self.connection.clone().lock_owned().await;
        let mut report = SessionReport {
            session_id: self.session_id.clone(),
            state: SessionState::Idle,
            finish_sent: false,
            cancelled: false,
            text_chunks: 0,
            audio_chunks: 0,
            stale_frames: 0,
        };

        if cancel.is_cancelled() || self.audio_tx.is_closed() {
            report.cancelled = true;
            return report;
        }

        if let Err(e) = ensure_open(&mut guard, self.connector.as_ref()).await {
            warn!("Synthesis connection failed: {}", e);
            self.set_state(SessionState::Failed);
            report.state = SessionState::Failed;
            let _ = self.audio_tx.send(Err(e));
            return report;
        }
        let Some(connection) = guard.as_mut() else {
            report.state = SessionState::Failed;
            return report;
        };

        let (start_sent, result) = self.drive(connection, text, &cancel, &mut report).await;

        // Every StartSession gets exactly one FinishSession
        if start_sent && !report.finish_sent {
            match connection.send(&Frame::finish_session(&self.session_id)).await {
                Ok(()) => report.finish_sent = true,
                Err(e) => warn!("FinishSession for {} not sent: {}", self.session_id, e),
            }
        }

        report.state = match &result {
            Err(_) => SessionState::Failed,
            Ok(ReceiveEnd::Finished) => SessionState::Finished,
            Ok(ReceiveEnd::Cancelled | ReceiveEnd::Abandoned) => {
                report.cancelled = true;
                if report.finish_sent {
                    SessionState::Finishing
                } else {
                    SessionState::Failed
                }
            }
        };
        self.set_state(report.state);

        if let Err(e) = result {
            if e.is_connection_fatal() {
                warn!("Synthesis connection discarded after error: {}", e);
                *guard = None;
            }
            warn!("Synthesis session {} failed: {}", self.session_id, e);
            let _ = self.audio_tx.send(Err(e));
        } else {
            debug!(
                "Synthesis session {} ended as {:?}: {} text chunks, {} audio chunks",
                self.session_id, report.state, report.text_chunks, report.audio_chunks
            );
        }
        report
    }

    /// Returns whether StartSession went out, plus the session outcome
    async fn drive(
        &self,
        connection: &mut Connection,
        text: BoxStream<'static, String>,
        cancel: &CancellationToken,
        report: &mut SessionReport,
    ) -> (bool, VoiceResult<ReceiveEnd>) {
        let payload = match request_payload(Event::StartSession, &Uuid::new_v4().to_string(), "", &self.params) {
            Ok(payload) => payload,
            Err(e) => return (false, Err(e)),
        };
        if let Err(e) = connection.send(&Frame::start_session(&self.session_id, payload)).await {
            return (false, Err(e));
        }
        self.set_state(SessionState::Starting);

        match self.await_started(&mut connection.source, cancel, report).await {
            Ok(true) => {}
            Ok(false) => return (true, Ok(ReceiveEnd::Cancelled)),
            Err(e) => return (true, Err(e)),
        }
        self.set_state(SessionState::Started);

        let halt = cancel.child_token();
        let Connection { sink, source } = connection;
        let (sent, received) = tokio::join!(
            self.send_text(sink, text, &halt),
            self.receive_audio(source, &halt)
        );

        let (text_chunks, finish_sent, send_result) = sent;
        let (audio_chunks, receive_result) = received;
        report.text_chunks = text_chunks;
        report.finish_sent = finish_sent;
        report.audio_chunks = audio_chunks;

        let result = match (send_result, receive_result) {
            (Err(e), _) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(_)) if cancel.is_cancelled() => Ok(ReceiveEnd::Cancelled),
            (Ok(()), Ok(end)) => Ok(end),
        };
        (true, result)
    }

    /// Discard stale frames until our SessionStarted
    ///
    /// `Ok(false)` if cancelled or the audio consumer went away first.
    async fn await_started(
        &self,
        source: &mut FrameSource,
        cancel: &CancellationToken,
        report: &mut SessionReport,
    ) -> VoiceResult<bool> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                frame = next_frame(source) => frame?,
                _ = self.audio_tx.closed() => {
                    debug!("Audio consumer dropped session {} before it started", self.session_id);
                    return Ok(false);
                }
            };

            if frame.message_type == MessageType::ErrorInfo {
                return Err(VoiceError::ServerError {
                    code: frame.error_code.unwrap_or(0),
                    message: frame.payload_text(),
                });
            }
            let ours = frame.is_for_session(&self.session_id);
            match frame.event {
                Some(Event::SessionStarted) if ours => return Ok(true),
                Some(Event::SessionFailed) if ours => {
                    return Err(VoiceError::SessionFailed {
                        session_id: self.session_id.clone(),
                        detail: frame.payload_text(),
                    })
                }
                event => {
                    report.stale_frames += 1;
                    debug!(
                        "Discarding stale {:?} for session {:?}",
                        event, frame.session_id
                    );
                }
            }
        }
    }

    /// Forward text chunks until the stream ends or `halt` fires, then finish
    ///
    /// Returns (TaskRequests sent, FinishSession sent, result).
    async fn send_text(
        &self,
        sink: &mut FrameSink,
        mut text: BoxStream<'static, String>,
        halt: &CancellationToken,
    ) -> (usize, bool, VoiceResult<()>) {
        let mut sent = 0;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                chunk = text.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            if chunk.trim().is_empty() {
                continue;
            }

            let frame = request_payload(Event::TaskRequest, &Uuid::new_v4().to_string(), &chunk, &self.params)
                .map(|payload| Frame::task_request(&self.session_id, payload))
                .and_then(|frame| encode(&frame));
            let result = match frame {
                Ok(bytes) => sink.send(bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                halt.cancel();
                return (sent, false, Err(e));
            }
            sent += 1;
            if sent == 1 {
                self.set_state(SessionState::Streaming);
            }
        }

        let finish = encode(&Frame::finish_session(&self.session_id));
        let result = match finish {
            Ok(bytes) => sink.send(bytes).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.set_state(SessionState::Finishing);
                (sent, true, Ok(()))
            }
            Err(e) => {
                halt.cancel();
                (sent, false, Err(e))
            }
        }
    }

    /// Yield audio until SessionFinished (or any non-audio frame)
    ///
    /// Any exit fires `halt` so a sender still waiting on text stops and
    /// finishes the session. Returns (audio chunks delivered, result).
    async fn receive_audio(&self, source: &mut FrameSource, halt: &CancellationToken) -> (usize, VoiceResult<ReceiveEnd>) {
        let mut chunks = 0;
        loop {
            let frame = tokio::select! {
                biased;
                _ = halt.cancelled() => return (chunks, Ok(ReceiveEnd::Cancelled)),
                frame = next_frame(source) => frame,
                _ = self.audio_tx.closed() => {
                    debug!("Audio consumer dropped session {}", self.session_id);
                    halt.cancel();
                    return (chunks, Ok(ReceiveEnd::Abandoned));
                }
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    halt.cancel();
                    return (chunks, Err(e));
                }
            };

            if frame.message_type == MessageType::ErrorInfo {
                halt.cancel();
                return (
                    chunks,
                    Err(VoiceError::ServerError {
                        code: frame.error_code.unwrap_or(0),
                        message: frame.payload_text(),
                    }),
                );
            }

            match frame.event {
                Some(Event::TtsResponse) => {
                    if !frame.is_for_session(&self.session_id) {
                        continue;
                    }
                    chunks += 1;
                    if self.audio_tx.send(Ok(frame.payload)).is_err() {
                        debug!("Audio consumer dropped session {}", self.session_id);
                        halt.cancel();
                        return (chunks, Ok(ReceiveEnd::Abandoned));
                    }
                }
                Some(Event::SentenceStart | Event::SentenceEnd) => {}
                Some(Event::SessionFinished) => {
                    halt.cancel();
                    return (chunks, Ok(ReceiveEnd::Finished));
                }
                Some(Event::SessionFailed) => {
                    halt.cancel();
                    return (
                        chunks,
                        Err(VoiceError::SessionFailed {
                            session_id: self.session_id.clone(),
                            detail: frame.payload_text(),
                        }),
                    );
                }
                other => {
                    debug!("Session {} ended by {:?}", self.session_id, other);
                    halt.cancel();
                    return (chunks, Ok(ReceiveEnd::Finished));
                }
            }
        }
    }
}

/// Audio produced by one synthesis session
pub struct SynthesisStream {
    session_id: String,
    audio: mpsc::UnboundedReceiver<VoiceResult<Vec<u8>>>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<SessionReport>,
}

impl SynthesisStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Next audio chunk; an `Err` item means the session failed
    pub async fn next_chunk(&mut self) -> Option<VoiceResult<Vec<u8>>> {
        self.audio.recv().await
    }

    /// Stop reading audio and wait for the session task to wrap up
    pub async fn finish(self) -> VoiceResult<SessionReport> {
        drop(self.audio);
        self.task
            .await
            .map_err(|e| VoiceError::Protocol(format!("synthesis task failed: {}", e)))
    }
}

impl Stream for SynthesisStream {
    type Item = VoiceResult<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.audio.poll_recv(cx)
    }
}
