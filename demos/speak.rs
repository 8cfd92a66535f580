// Demo: synthesize text through the streaming provider and play it
//
// Requires synthesis credentials in config/loqa-voice.toml or the
// LOQA_VOICE__SYNTHESIS__* environment variables.
//
// Usage: cargo run --example speak -- "你好，今天天气怎么样？" --save reply.wav

use anyhow::{Context, Result};
use clap::Parser;
use loqa_voice::audio::{AudioEngine, AudioFile, FrameAssembler, Resampler};
use loqa_voice::config::{self, Config};
use loqa_voice::synthesis::{SynthesisEngine, WebSocketConnector};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "speak")]
#[command(about = "Speak text through the synthesis provider")]
struct Args {
    /// Text to speak; each argument becomes one TaskRequest
    #[arg(required = true)]
    text: Vec<String>,

    /// Also save the synthesized audio
    #[arg(short, long)]
    save: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    let args = Args::parse();
    let cfg = Config::load_or_default(config::DEFAULT_PATH)?;

    let engine = AudioEngine::init(&cfg.audio)?;
    let output = cfg.audio.output.clone();
    let synthesis = SynthesisEngine::new(
        Arc::new(WebSocketConnector::new(cfg.synthesis.clone())),
        cfg.synthesis.speech_params(),
    );
    synthesis.open().await.context("synthesis handshake failed")?;

    let mut stream = synthesis.synthesize(futures::stream::iter(args.text), CancellationToken::new());
    info!("Session {} started", stream.session_id());

    // Provider audio is mono; the output may differ in rate and channels
    let mut resampler = Resampler::new(cfg.synthesis.sample_rate, output.sample_rate);
    let mut assembler = FrameAssembler::new(output.frame_bytes(), output.sample_rate, output.channels);
    let mut spoken: Vec<i16> = Vec::new();

    let mut play = |samples: Vec<i16>| {
        spoken.extend_from_slice(&samples);
        let bytes: Vec<u8> = samples
            .iter()
            .flat_map(|s| std::iter::repeat(s.to_le_bytes()).take(output.channels as usize))
            .flatten()
            .collect();
        for frame in assembler.push(&bytes) {
            engine.enqueue_playback(frame);
        }
    };

    while let Some(chunk) = stream.next_chunk().await {
        let chunk = chunk?;
        let samples: Vec<i16> = chunk
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        play(resampler.process(&samples));
    }
    play(resampler.flush());
    if let Some(frame) = assembler.flush() {
        engine.enqueue_playback(frame);
    }

    let report = stream.finish().await?;
    info!("Session ended as {:?} with {} audio chunks", report.state, report.audio_chunks);
    engine.wait_playback_complete().await;

    if let Some(path) = args.save {
        AudioFile::new(spoken, output.sample_rate, 1).save(&path)?;
        info!("Saved {}", path.display());
    }
    synthesis.close().await?;
    Ok(())
}
