// Shared fixtures for the integration tests: a scripted synthesis provider
// on the in-memory transport and helpers for building capture frames.

#![allow(dead_code)]

use loqa_voice::audio::{AudioFrame, AudioStreamConfig, PlaybackQueue};
use loqa_voice::synthesis::{Event, Frame, MemoryServer, ServerConnection};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound for any single wait in a test
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out waiting for the pipeline")
}

/// Poll `condition` every few milliseconds until it holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}

/// A client frame as the provider saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub event: Event,
    pub session_id: Option<String>,
    /// `req_params.text` of TaskRequest frames
    pub text: Option<String>,
}

pub type ServerLog = Arc<Mutex<Vec<Received>>>;

pub fn request_text(frame: &Frame) -> String {
    let body: serde_json::Value = serde_json::from_slice(&frame.payload).expect("request payload is JSON");
    body["req_params"]["text"].as_str().unwrap_or_default().to_string()
}

/// Provider that answers every request, sending `audio` once per TaskRequest
pub fn spawn_tts_server(mut server: MemoryServer, audio: Vec<u8>) -> ServerLog {
    let log: ServerLog = Arc::new(Mutex::new(Vec::new()));
    let shared = log.clone();
    tokio::spawn(async move {
        while let Some(connection) = server.accept().await {
            tokio::spawn(serve(connection, audio.clone(), shared.clone()));
        }
    });
    log
}

async fn serve(mut connection: ServerConnection, audio: Vec<u8>, log: ServerLog) {
    while let Some(Ok(frame)) = connection.recv().await {
        let Some(event) = frame.event else { continue };
        let text = (event == Event::TaskRequest).then(|| request_text(&frame));
        log.lock().unwrap().push(Received {
            event,
            session_id: frame.session_id.clone(),
            text,
        });

        let id = frame.session_id.as_deref();
        let reply = match event {
            Event::StartConnection => Some(Frame::server(Event::ConnectionStarted, None, b"conn".to_vec())),
            Event::StartSession => Some(Frame::server(Event::SessionStarted, id, b"{}".to_vec())),
            Event::TaskRequest => Some(Frame::audio(id.unwrap_or_default(), audio.clone())),
            Event::FinishSession => Some(Frame::server(Event::SessionFinished, id, b"{}".to_vec())),
            Event::FinishConnection => Some(Frame::server(Event::ConnectionFinished, Some(""), b"{}".to_vec())),
            _ => None,
        };
        if let Some(reply) = reply {
            if connection.send(&reply).is_err() {
                break;
            }
        }
    }
}

pub fn count(log: &ServerLog, event: Event) -> usize {
    log.lock().unwrap().iter().filter(|r| r.event == event).count()
}

/// Session ids in the order their StartSession / FinishSession arrived
pub fn sessions(log: &ServerLog, event: Event) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|r| r.event == event)
        .filter_map(|r| r.session_id.clone())
        .collect()
}

/// Default capture format: 16 kHz mono, 10 ms frames
pub fn input_config() -> AudioStreamConfig {
    AudioStreamConfig::default()
}

pub fn speech_frame(config: &AudioStreamConfig) -> AudioFrame {
    let samples: Vec<i16> = (0..config.frame_samples())
        .map(|i| if i % 2 == 0 { 3000 } else { -3000 })
        .collect();
    AudioFrame::from_samples(&samples, config.sample_rate, config.channels)
}

pub fn silence_frame(config: &AudioStreamConfig) -> AudioFrame {
    AudioFrame::silence(config.frame_bytes(), config.sample_rate, config.channels)
}

/// Stand-in for the output device: pulls one frame every `tick`
pub fn spawn_playback_drain(queue: Arc<PlaybackQueue>, tick: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let len = queue.frame_bytes();
        loop {
            let _ = queue.next_playback_frame(len);
            tokio::time::sleep(tick).await;
        }
    })
}
