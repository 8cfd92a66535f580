use super::backend::AudioFrame;

/// Re-chunks arbitrary PCM byte runs into exact output frames
///
/// Synthesis audio arrives in whatever sizes the provider chooses. Playback
/// wants frames of one fixed length, so bytes are buffered until a full
/// frame is available; `flush` zero-pads the final partial frame.
pub struct FrameAssembler {
    frame_bytes: usize,
    sample_rate: u32,
    channels: u16,
    pending: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(frame_bytes: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            frame_bytes,
            sample_rate,
            channels,
            pending: Vec::with_capacity(frame_bytes * 2),
        }
    }

    /// Append bytes and return every complete frame
    pub fn push(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        if self.frame_bytes == 0 {
            return Vec::new();
        }
        self.pending.extend_from_slice(bytes);

        let complete = self.pending.len() / self.frame_bytes * self.frame_bytes;
        let frames = self.pending[..complete]
            .chunks_exact(self.frame_bytes)
            .map(|chunk| AudioFrame::from_bytes(chunk.to_vec(), self.sample_rate, self.channels))
            .collect();
        self.pending.drain(..complete);
        frames
    }

    /// Pad the buffered remainder to a full frame, if any
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let mut data = std::mem::take(&mut self.pending);
        data.resize(self.frame_bytes, 0);
        Some(AudioFrame::from_bytes(data, self.sample_rate, self.channels))
    }

    /// Bytes waiting for a full frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
