pub mod audio;
pub mod config;
pub mod dialogue;
pub mod endpoint;
pub mod error;
pub mod providers;
pub mod registry;
pub mod synthesis;

pub use audio::{AudioConfig, AudioEngine, AudioFile, AudioFrame, AudioStreamConfig, PlaybackQueue};
pub use config::Config;
pub use dialogue::{ActivityContext, DialogueStats, Orchestrator, Transcript, Turn};
pub use endpoint::{EndpointConfig, Endpointer};
pub use error::{VoiceError, VoiceResult};
pub use synthesis::{SynthesisConfig, SynthesisEngine, SynthesisStream};
