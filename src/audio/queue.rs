//! Frame queues shared between the hardware callbacks and the async side
//!
//! Capture: the callback pushes with `try_send` into a bounded tokio channel.
//! A full queue drops the newest frame and bumps a counter.
//!
//! Playback: the orchestrator pushes into an unbounded crossbeam channel
//! guarded by a `RwLock`. The callback only ever `try_read`s the lock, so a
//! concurrent `clear` (which swaps in a fresh channel under the write lock)
//! costs the callback at most one tick of silence.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use super::backend::{AudioFrame, AudioStreamConfig};

/// Receiving end of the capture queue
pub type CaptureQueue = mpsc::Receiver<AudioFrame>;

/// Handle owned by the capture callback
///
/// Accumulates raw callback samples into exact frames and pushes them
/// without blocking.
pub struct CaptureSink {
    tx: mpsc::Sender<AudioFrame>,
    active: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    pending: Vec<i16>,
    /// Little-endian staging for the frame being emitted
    encoded: Vec<u8>,
    frame_len: usize,
    sample_rate: u32,
    channels: u16,
    emitted_samples: u64,
}

impl CaptureSink {
    /// Create the sink and the matching queue
    pub fn channel(config: &AudioStreamConfig) -> (Self, CaptureQueue, CaptureControl) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let control = CaptureControl {
            active: Arc::new(AtomicBool::new(true)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        let frame_len = config.frame_samples() * config.channels as usize;
        let sink = Self {
            tx,
            active: control.active.clone(),
            dropped: control.dropped.clone(),
            pending: Vec::with_capacity(frame_len),
            encoded: Vec::with_capacity(frame_len * 2),
            frame_len,
            sample_rate: config.sample_rate,
            channels: config.channels,
            emitted_samples: 0,
        };
        (sink, rx, control)
    }

    /// Feed samples from a hardware callback
    ///
    /// Complete frames are pushed; the remainder waits for the next call.
    /// The working buffers never grow past one frame, so the only
    /// allocation per frame is the frame's own storage.
    pub fn on_samples(&mut self, mut samples: &[i16]) {
        if self.frame_len == 0 {
            return;
        }
        while !samples.is_empty() {
            let take = (self.frame_len - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];
            if self.pending.len() == self.frame_len {
                self.emit_pending();
            }
        }
    }

    fn emit_pending(&mut self) {
        self.encoded.clear();
        for sample in &self.pending {
            self.encoded.extend_from_slice(&sample.to_le_bytes());
        }
        self.pending.clear();

        let timestamp_ms =
            self.emitted_samples * 1000 / (self.sample_rate as u64 * self.channels.max(1) as u64).max(1);
        self.emitted_samples += self.frame_len as u64;
        let data: Arc<[u8]> = Arc::from(self.encoded.as_slice());
        self.on_frame(AudioFrame::from_bytes(data, self.sample_rate, self.channels).with_timestamp(timestamp_ms));
    }

    /// Push one complete frame; returns false if it was dropped
    pub fn on_frame(&self, frame: AudioFrame) -> bool {
        if !self.active.load(Ordering::Relaxed) {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    warn!("Capture queue full, {} frames dropped so far", dropped);
                }
                false
            }
        }
    }
}

/// Shared switches for the capture side
#[derive(Clone)]
pub struct CaptureControl {
    active: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl CaptureControl {
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Frames dropped because the queue was full
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Lane {
    tx: Sender<AudioFrame>,
    rx: Receiver<AudioFrame>,
}

impl Lane {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

/// Playback queue written by the orchestrator and drained by the callback
pub struct PlaybackQueue {
    lane: RwLock<Lane>,
    active: AtomicBool,
    /// Bumped on every clear so readers drop their partial frame
    generation: AtomicU64,
    frame_bytes: usize,
}

impl PlaybackQueue {
    pub fn new(frame_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            lane: RwLock::new(Lane::new()),
            active: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            frame_bytes,
        })
    }

    /// Size of one output frame in bytes
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn enqueue(&self, frame: AudioFrame) {
        // The receiver lives in the same lane, so send cannot fail
        let _ = self.lane.read().tx.send(frame);
    }

    /// Drop everything queued by swapping in an empty lane
    ///
    /// Returns the number of frames discarded.
    pub fn clear(&self) -> usize {
        let old = {
            let mut lane = self.lane.write();
            self.generation.fetch_add(1, Ordering::AcqRel);
            std::mem::replace(&mut *lane, Lane::new())
        };
        old.rx.len()
    }

    pub fn len(&self) -> usize {
        self.lane.read().rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Non-blocking pop; `None` if empty, inactive or a clear holds the lock
    fn try_pop(&self) -> Option<AudioFrame> {
        if !self.is_active() {
            return None;
        }
        let lane = self.lane.try_read()?;
        lane.rx.try_recv().ok()
    }

    /// Next playback buffer of exactly `len` bytes
    ///
    /// A queued frame is padded or truncated to `len`; an empty queue yields
    /// zeros. Never blocks.
    pub fn next_playback_frame(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        if let Some(frame) = self.try_pop() {
            let n = frame.len().min(len);
            out[..n].copy_from_slice(&frame.bytes()[..n]);
        }
        out
    }

    /// Reader for a playback callback with arbitrary buffer sizes
    pub fn reader(self: &Arc<Self>) -> PlaybackReader {
        PlaybackReader {
            queue: self.clone(),
            current: None,
            offset: 0,
            generation: self.generation(),
        }
    }
}

/// Handle owned by the playback callback
///
/// Device buffers rarely line up with frame boundaries; the reader keeps the
/// unplayed tail of the current frame between calls.
pub struct PlaybackReader {
    queue: Arc<PlaybackQueue>,
    current: Option<AudioFrame>,
    offset: usize,
    generation: u64,
}

impl PlaybackReader {
    /// Fill `out` completely with queued samples, then silence
    pub fn fill_i16(&mut self, out: &mut [i16]) {
        let generation = self.queue.generation();
        if generation != self.generation {
            self.generation = generation;
            self.current = None;
            self.offset = 0;
        }

        let mut written = 0;
        while written < out.len() {
            if self.current.is_none() {
                match self.queue.try_pop() {
                    Some(frame) => {
                        self.current = Some(frame);
                        self.offset = 0;
                    }
                    None => break,
                }
            }
            let Some(frame) = self.current.as_ref() else {
                break;
            };
            let bytes = frame.bytes();
            while written < out.len() && self.offset + 1 < bytes.len() {
                out[written] = i16::from_le_bytes([bytes[self.offset], bytes[self.offset + 1]]);
                written += 1;
                self.offset += 2;
            }
            if self.offset + 1 >= bytes.len() {
                self.current = None;
            }
        }

        out[written..].fill(0);
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }
}
