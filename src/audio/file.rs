use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;
use tracing::info;

use super::backend::AudioFrame;
use super::resample::resample;
use crate::error::VoiceResult;

/// 16-bit PCM audio held in memory, backed by WAV on disk
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        let duration_seconds =
            samples.len() as f64 / (sample_rate.max(1) as f64 * channels.max(1) as f64);
        Self {
            duration_seconds,
            sample_rate,
            channels,
            samples,
        }
    }

    /// Concatenate frames that share one format
    pub fn from_frames(frames: &[AudioFrame]) -> Self {
        let (sample_rate, channels) = frames
            .first()
            .map(|f| (f.sample_rate, f.channels))
            .unwrap_or((16000, 1));
        let samples = frames.iter().flat_map(|f| f.samples()).collect();
        Self::new(samples, sample_rate, channels)
    }

    pub fn open(path: impl AsRef<Path>) -> VoiceResult<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<Vec<_>, _>>()?;
        let file = Self::new(samples, spec.sample_rate, spec.channels);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            file.duration_seconds,
            file.sample_rate,
            file.channels,
            file.samples.len()
        );
        Ok(file)
    }

    fn spec(&self) -> WavSpec {
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> VoiceResult<()> {
        let path = path.as_ref();
        let mut writer = WavWriter::create(path, self.spec())?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        info!(
            "Wrote {:.1}s of audio to {}",
            self.duration_seconds,
            path.display()
        );
        Ok(())
    }

    /// Encode as an in-memory WAV (for uploads)
    pub fn to_wav_bytes(&self) -> VoiceResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, self.spec())?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Polyphase-resample to `rate`, keeping the channel count
    pub fn resampled(&self, rate: u32) -> Self {
        if rate == self.sample_rate {
            return self.clone();
        }
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return Self::new(resample(&self.samples, self.sample_rate, rate), rate, 1);
        }

        let per_channel: Vec<Vec<i16>> = (0..channels)
            .map(|c| {
                let lane: Vec<i16> = self.samples.iter().skip(c).step_by(channels).copied().collect();
                resample(&lane, self.sample_rate, rate)
            })
            .collect();
        let len = per_channel.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(len * channels);
        for i in 0..len {
            for lane in &per_channel {
                samples.push(lane[i]);
            }
        }
        Self::new(samples, rate, self.channels)
    }
}
