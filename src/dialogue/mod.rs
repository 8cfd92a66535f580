//! Dialogue orchestration: transcript, response activities and barge-in

pub mod activity;
pub mod collaborators;
pub mod orchestrator;
pub mod phrase;
pub mod transcript;

pub use activity::{ActivityContext, ActivityOutcome, ResponseActivity};
pub use collaborators::{
    GenerationChunk, GenerationStream, TextGenerator, ToolBroker, ToolCall, ToolDefinition, Transcriber,
};
pub use orchestrator::{DialogueStats, Orchestrator};
pub use phrase::PhraseSegmenter;
pub use transcript::{Role, ToolMetadata, Transcript, Turn};
