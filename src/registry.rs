//! Name to constructor tables for pluggable collaborators
//!
//! Resolved once at startup from configuration. An unknown name is a
//! configuration error.

use std::sync::Arc;

use crate::audio::AudioStreamConfig;
use crate::dialogue::{TextGenerator, ToolBroker, Transcriber};
use crate::endpoint::{EndpointConfig, EnergyClassifier, SpeechClassifier, WebRtcClassifier};
use crate::error::{VoiceError, VoiceResult};
use crate::providers::{
    EchoGenerator, FixedTranscriber, GenerationConfig, OpenAiGenerator, OpenAiTranscriber, ToolRegistry,
    ToolsConfig, TranscriptionConfig,
};

type ClassifierCtor = fn(&EndpointConfig, &AudioStreamConfig) -> VoiceResult<Box<dyn SpeechClassifier>>;
type TranscriberCtor = fn(&TranscriptionConfig) -> VoiceResult<Arc<dyn Transcriber>>;
type GeneratorCtor = fn(&GenerationConfig, Arc<dyn ToolBroker>) -> VoiceResult<Arc<dyn TextGenerator>>;

pub const CLASSIFIERS: &[(&str, ClassifierCtor)] = &[("webrtc", webrtc_classifier), ("energy", energy_classifier)];

pub const TRANSCRIBERS: &[(&str, TranscriberCtor)] = &[("openai", openai_transcriber), ("fixed", fixed_transcriber)];

pub const GENERATORS: &[(&str, GeneratorCtor)] = &[("openai", openai_generator), ("echo", echo_generator)];

fn webrtc_classifier(endpoint: &EndpointConfig, input: &AudioStreamConfig) -> VoiceResult<Box<dyn SpeechClassifier>> {
    Ok(Box::new(WebRtcClassifier::new(
        input.sample_rate,
        input.chunk_duration_ms,
        endpoint.vad_mode,
    )?))
}

fn energy_classifier(endpoint: &EndpointConfig, _input: &AudioStreamConfig) -> VoiceResult<Box<dyn SpeechClassifier>> {
    Ok(Box::new(EnergyClassifier::new(endpoint.energy_threshold)))
}

fn openai_transcriber(config: &TranscriptionConfig) -> VoiceResult<Arc<dyn Transcriber>> {
    Ok(Arc::new(OpenAiTranscriber::new(config.clone())?))
}

fn fixed_transcriber(config: &TranscriptionConfig) -> VoiceResult<Arc<dyn Transcriber>> {
    Ok(Arc::new(FixedTranscriber::new(config.fixed_text.clone())))
}

fn openai_generator(config: &GenerationConfig, tools: Arc<dyn ToolBroker>) -> VoiceResult<Arc<dyn TextGenerator>> {
    Ok(Arc::new(OpenAiGenerator::new(config.clone(), tools)?))
}

fn echo_generator(_config: &GenerationConfig, _tools: Arc<dyn ToolBroker>) -> VoiceResult<Arc<dyn TextGenerator>> {
    Ok(Arc::new(EchoGenerator::new()))
}

/// Built-in tool names accepted in `tools.enabled`
pub const TOOLS: &[&str] = &["time"];

fn lookup<T: Copy>(table: &[(&str, T)], kind: &str, name: &str) -> VoiceResult<T> {
    table
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, ctor)| *ctor)
        .ok_or_else(|| {
            let known: Vec<&str> = table.iter().map(|(key, _)| *key).collect();
            VoiceError::Config(format!(
                "unknown {} \"{}\" (known: {})",
                kind,
                name,
                known.join(", ")
            ))
        })
}

pub fn classifier(endpoint: &EndpointConfig, input: &AudioStreamConfig) -> VoiceResult<Box<dyn SpeechClassifier>> {
    lookup(CLASSIFIERS, "classifier", &endpoint.classifier)?(endpoint, input)
}

pub fn transcriber(config: &TranscriptionConfig) -> VoiceResult<Arc<dyn Transcriber>> {
    lookup(TRANSCRIBERS, "transcriber", &config.provider)?(config)
}

pub fn generator(config: &GenerationConfig, tools: Arc<dyn ToolBroker>) -> VoiceResult<Arc<dyn TextGenerator>> {
    lookup(GENERATORS, "generator", &config.provider)?(config, tools)
}

pub fn tools(config: &ToolsConfig) -> VoiceResult<Arc<ToolRegistry>> {
    Ok(Arc::new(ToolRegistry::with_enabled(&config.enabled)?))
}

/// Check a name against a table without constructing anything
pub fn is_registered(table: &[(&str, impl Copy)], name: &str) -> bool {
    table.iter().any(|(key, _)| *key == name)
}
