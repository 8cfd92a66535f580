// Demo: save each spoken utterance from the microphone as a WAV file
//
// Usage: cargo run --example record_utterances -- --duration 30 --output-dir utterances

use anyhow::{Context, Result};
use clap::Parser;
use loqa_voice::audio::{AudioEngine, AudioFile};
use loqa_voice::config::{self, Config};
use loqa_voice::endpoint::Endpointer;
use loqa_voice::registry;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "record_utterances")]
#[command(about = "Split microphone input into utterances and save them")]
struct Args {
    /// Seconds to listen
    #[arg(short, long, default_value = "30")]
    duration: u64,

    /// Directory for the WAV files
    #[arg(short, long, default_value = "utterances")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    let args = Args::parse();
    let cfg = Config::load_or_default(config::DEFAULT_PATH)?;

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("cannot create {}", args.output_dir.display()))?;

    let mut engine = AudioEngine::init(&cfg.audio)?;
    let mut capture = engine.capture_queue().context("capture queue already taken")?;
    let classifier = registry::classifier(&cfg.endpoint, &cfg.audio.input)?;
    let mut endpointer = Endpointer::new(
        classifier,
        cfg.audio.input.frame_bytes(),
        cfg.endpoint.silence_threshold_ms,
    );

    info!("Listening for {} seconds, speak a few sentences", args.duration);
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut saved = 0;

    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, capture.recv()).await {
        let Some(event) = endpointer.process(frame).event else {
            continue;
        };
        saved += 1;
        let path = args.output_dir.join(format!("utterance-{:03}.wav", saved));
        AudioFile::from_frames(&event.frames).save(&path)?;
        info!("Saved {} ({}ms)", path.display(), event.duration_ms());
    }

    engine.shutdown()?;
    info!("Done: {} utterances, {} capture frames dropped", saved, engine.dropped_capture_frames());
    Ok(())
}
