use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

use super::backend::{AudioBackend, AudioConfig, AudioStreamConfig};
use super::queue::{CaptureSink, PlaybackReader};
use crate::error::{VoiceError, VoiceResult};

/// Fills one capture buffer; receives the tick index
pub type SampleSource = Box<dyn FnMut(u64, &mut [i16]) + Send>;

/// Hardware-free backend driven by a timer thread
///
/// Each tick produces one capture frame from the sample source and drains one
/// output frame into the `played` buffer, mimicking the two device callbacks.
pub struct SimulatedBackend {
    input: AudioStreamConfig,
    output: AudioStreamConfig,
    tick: Duration,
    source: Option<SampleSource>,
    played: Arc<Mutex<Vec<i16>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedBackend {
    /// Silent input, ticking in real time
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input: config.input.clone(),
            output: config.output.clone(),
            tick: Duration::from_millis(config.input.chunk_duration_ms.max(1) as u64),
            source: Some(Box::new(|_, buf: &mut [i16]| buf.fill(0))),
            played: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Sine tone input
    pub fn tone(config: &AudioConfig, frequency: f32, amplitude: i16) -> Self {
        let rate = config.input.sample_rate as f32;
        let mut phase = 0.0f32;
        let step = 2.0 * std::f32::consts::PI * frequency / rate;
        Self::new(config).with_source(Box::new(move |_, buf: &mut [i16]| {
            for sample in buf.iter_mut() {
                *sample = (phase.sin() * amplitude as f32) as i16;
                phase = (phase + step) % (2.0 * std::f32::consts::PI);
            }
        }))
    }

    pub fn with_source(mut self, source: SampleSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the tick period (faster than real time in tests)
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Everything the playback side has emitted, silence included
    pub fn played(&self) -> Arc<Mutex<Vec<i16>>> {
        self.played.clone()
    }
}

impl AudioBackend for SimulatedBackend {
    fn start(&mut self, mut capture: CaptureSink, mut playback: PlaybackReader) -> VoiceResult<()> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| VoiceError::AudioStream("simulated backend already started".to_string()))?;

        let capture_len = self.input.frame_samples() * self.input.channels as usize;
        let playback_len = self.output.frame_samples() * self.output.channels as usize;
        let tick = self.tick;
        let played = self.played.clone();
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let worker = std::thread::Builder::new()
            .name("simulated-audio".to_string())
            .spawn(move || {
                let mut index = 0u64;
                let mut input = vec![0i16; capture_len];
                let mut output = vec![0i16; playback_len];
                while running.load(Ordering::SeqCst) {
                    source(index, &mut input);
                    capture.on_samples(&input);
                    playback.fill_i16(&mut output);
                    played.lock().extend_from_slice(&output);
                    index += 1;
                    std::thread::sleep(tick);
                }
            })?;

        self.worker = Some(worker);
        info!("Simulated audio started ({:?} per tick)", self.tick);
        Ok(())
    }

    fn stop(&mut self) -> VoiceResult<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| VoiceError::AudioStream("simulated audio thread panicked".to_string()))?;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
