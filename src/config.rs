use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::audio::AudioConfig;
use crate::endpoint::EndpointConfig;
use crate::providers::{GenerationConfig, ToolsConfig, TranscriptionConfig};
use crate::registry;
use crate::synthesis::SynthesisConfig;

/// Default configuration file, extension resolved by the `config` crate
pub const DEFAULT_PATH: &str = "config/loqa-voice";

/// Environment prefix; `LOQA_VOICE__SYNTHESIS__ACCESS_TOKEN` sets `synthesis.access_token`
pub const ENV_PREFIX: &str = "LOQA_VOICE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub endpoint: EndpointConfig,
    pub synthesis: SynthesisConfig,
    pub transcription: TranscriptionConfig,
    pub generation: GenerationConfig,
    pub tools: ToolsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (must exist) layered under the environment
    pub fn load(path: &str) -> Result<Self> {
        Self::build(path, true)
    }

    /// Like `load`, but a missing file falls back to defaults
    pub fn load_or_default(path: &str) -> Result<Self> {
        Self::build(path, false)
    }

    fn build(path: &str, required: bool) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tools.enabled")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        let config: Self = settings
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        for (direction, stream) in [("input", &self.audio.input), ("output", &self.audio.output)] {
            if stream.sample_rate == 0 {
                bail!("audio.{}.sample_rate must be non-zero", direction);
            }
            if stream.channels == 0 {
                bail!("audio.{}.channels must be non-zero", direction);
            }
            if stream.frame_bytes() == 0 {
                bail!(
                    "audio.{}.chunk_duration_ms {} gives empty frames at {} Hz",
                    direction,
                    stream.chunk_duration_ms,
                    stream.sample_rate
                );
            }
        }

        if !registry::is_registered(registry::CLASSIFIERS, &self.endpoint.classifier) {
            bail!("unknown endpoint.classifier \"{}\"", self.endpoint.classifier);
        }
        if self.endpoint.classifier == "webrtc" {
            let input = &self.audio.input;
            if !matches!(input.chunk_duration_ms, 10 | 20 | 30) {
                bail!(
                    "the webrtc classifier needs 10, 20 or 30 ms frames, audio.input.chunk_duration_ms is {}",
                    input.chunk_duration_ms
                );
            }
            if !matches!(input.sample_rate, 8000 | 16000 | 32000 | 48000) {
                bail!(
                    "the webrtc classifier needs 8, 16, 32 or 48 kHz input, audio.input.sample_rate is {}",
                    input.sample_rate
                );
            }
            if input.channels != 1 {
                bail!("the webrtc classifier needs mono input");
            }
            if self.endpoint.vad_mode > 3 {
                bail!("endpoint.vad_mode must be 0-3, got {}", self.endpoint.vad_mode);
            }
        }

        if self.synthesis.url.trim().is_empty() {
            bail!("synthesis.url must be set");
        }
        if self.synthesis.sample_rate == 0 {
            bail!("synthesis.sample_rate must be non-zero");
        }
        if !registry::is_registered(registry::TRANSCRIBERS, &self.transcription.provider) {
            bail!("unknown transcription.provider \"{}\"", self.transcription.provider);
        }
        if !registry::is_registered(registry::GENERATORS, &self.generation.provider) {
            bail!("unknown generation.provider \"{}\"", self.generation.provider);
        }
        if let Some(tool) = self.tools.enabled.iter().find(|t| !registry::TOOLS.contains(&t.as_str())) {
            bail!("unknown tool \"{}\" in tools.enabled", tool);
        }
        Ok(())
    }
}
