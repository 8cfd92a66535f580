// Integration tests for the audio engine on the simulated backend
//
// The simulated backend ticks a timer thread in place of device callbacks,
// so these run without any audio hardware.

mod common;

use anyhow::Result;
use common::{eventually, within};
use loqa_voice::audio::{AudioConfig, AudioEngine, AudioFile, AudioFrame, SimulatedBackend};
use std::time::Duration;

const FAST_TICK: Duration = Duration::from_millis(1);

fn engine_with(backend: SimulatedBackend, config: &AudioConfig) -> Result<AudioEngine> {
    Ok(AudioEngine::with_backend(config, Box::new(backend))?)
}

#[tokio::test]
async fn test_capture_delivers_exact_frames() -> Result<()> {
    let config = AudioConfig::default();
    let backend = SimulatedBackend::tone(&config, 440.0, 8000).with_tick(FAST_TICK);
    let mut engine = engine_with(backend, &config)?;
    let mut capture = engine.capture_queue().expect("capture queue available once");
    assert!(engine.capture_queue().is_none());

    let mut last_timestamp = None;
    for _ in 0..5 {
        let frame = within(capture.recv()).await.expect("capture is running");
        assert_eq!(frame.len(), config.input.frame_bytes());
        assert_eq!(frame.sample_rate, 16000);
        if let Some(previous) = last_timestamp {
            assert_eq!(frame.timestamp_ms, previous + 10);
        }
        last_timestamp = Some(frame.timestamp_ms);
    }

    engine.shutdown()?;
    assert!(!engine.is_running());
    Ok(())
}

#[tokio::test]
async fn test_playback_drains_and_underruns_with_silence() -> Result<()> {
    let config = AudioConfig::default();
    let backend = SimulatedBackend::new(&config).with_tick(FAST_TICK);
    let played = backend.played();
    let engine = engine_with(backend, &config)?;

    let frame_samples = config.output.frame_samples();
    let tone: Vec<i16> = (0..frame_samples).map(|i| (i as i16 % 100) + 1).collect();
    for _ in 0..3 {
        engine.enqueue_playback(AudioFrame::from_samples(&tone, 24000, 1));
    }
    assert!(!engine.is_playback_complete());
    within(engine.wait_playback_complete()).await;

    // The device keeps pulling silence once the queue is empty
    let before = played.lock().len();
    eventually(|| played.lock().len() > before + frame_samples * 2).await;

    let played = played.lock();
    let audible = played.iter().filter(|s| **s != 0).count();
    assert_eq!(audible, frame_samples * 3);
    Ok(())
}

#[tokio::test]
async fn test_clear_playback_discards_queue() -> Result<()> {
    let config = AudioConfig::default();
    let backend = SimulatedBackend::new(&config).with_tick(Duration::from_millis(50));
    let engine = engine_with(backend, &config)?;

    engine.set_playback_active(false);
    for _ in 0..10 {
        engine.enqueue_playback(AudioFrame::silence(config.output.frame_bytes(), 24000, 1));
    }
    assert_eq!(engine.clear_playback(), 10);
    assert!(engine.is_playback_complete());
    Ok(())
}

#[tokio::test]
async fn test_inactive_capture_produces_nothing() -> Result<()> {
    let config = AudioConfig::default();
    let backend = SimulatedBackend::new(&config).with_tick(FAST_TICK);
    let mut engine = engine_with(backend, &config)?;
    let mut capture = engine.capture_queue().unwrap();

    engine.set_capture_active(false);
    // Let frames produced before the switch through
    tokio::time::sleep(Duration::from_millis(20)).await;
    while capture.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(capture.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_self_test_writes_wav_at_output_rate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("self-test.wav");

    let config = AudioConfig::default();
    let backend = SimulatedBackend::tone(&config, 440.0, 8000).with_tick(FAST_TICK);
    let played = backend.played();
    let mut engine = engine_with(backend, &config)?;

    let report = within(engine.self_test(0.2, &path)).await?;
    assert_eq!(report.frames_captured, 20);
    assert_eq!(report.sample_rate, 24000);
    assert!((report.duration_seconds - 0.2).abs() < 0.01);

    let recording = AudioFile::open(&path)?;
    assert_eq!(recording.sample_rate, 24000);
    assert_eq!(recording.channels, 1);
    assert!(recording.samples.iter().any(|s| s.abs() > 1000));

    // The recording was played back through the output side
    assert!(played.lock().iter().any(|s| s.abs() > 1000));
    engine.shutdown()?;
    Ok(())
}
