use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_voice::audio::{list_devices, AudioEngine};
use loqa_voice::config::{self, Config};
use loqa_voice::dialogue::{ActivityContext, Orchestrator, Transcript};
use loqa_voice::endpoint::Endpointer;
use loqa_voice::registry;
use loqa_voice::synthesis::{SynthesisEngine, WebSocketConnector};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-voice")]
#[command(about = "Full-duplex voice assistant with barge-in")]
struct Args {
    /// Configuration file (any format the config crate reads)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dialogue loop until Ctrl-C
    Run,
    /// Record from the microphone, save a WAV and play it back
    SelfTest {
        /// Recording length in seconds
        #[arg(short, long, default_value = "5")]
        seconds: f64,

        /// Where to write the recording
        #[arg(short, long, default_value = "self-test.wav")]
        output: PathBuf,
    },
    /// List audio devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(config::DEFAULT_PATH)?,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Loqa Voice v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(cfg).await,
        Command::SelfTest { seconds, output } => self_test(cfg, seconds, output).await,
        Command::Devices => devices(),
    }
}

async fn run(cfg: Config) -> Result<()> {
    let mut engine = AudioEngine::init(&cfg.audio).context("failed to start audio devices")?;
    let capture = engine
        .capture_queue()
        .context("capture queue already taken")?;

    let classifier = registry::classifier(&cfg.endpoint, &cfg.audio.input)?;
    let endpointer = Endpointer::new(
        classifier,
        cfg.audio.input.frame_bytes(),
        cfg.endpoint.silence_threshold_ms,
    );
    let tools = registry::tools(&cfg.tools)?;
    let transcriber = registry::transcriber(&cfg.transcription)?;
    let generator = registry::generator(&cfg.generation, tools.clone())?;

    let connector = Arc::new(WebSocketConnector::new(cfg.synthesis.clone()));
    let synthesis = Arc::new(SynthesisEngine::new(connector, cfg.synthesis.speech_params()));
    if let Err(e) = synthesis.open().await {
        warn!("Synthesis connection not ready, will retry on first reply: {}", e);
    }

    let context = ActivityContext {
        generator,
        tools,
        synthesis: synthesis.clone(),
        playback: engine.playback(),
        output: cfg.audio.output.clone(),
        synthesis_rate: cfg.synthesis.sample_rate,
        min_phrase_chars: cfg.generation.min_phrase_chars,
        max_tool_rounds: cfg.generation.max_tool_rounds,
    };
    let transcript = Transcript::with_system_prompt(&cfg.generation.system_prompt);
    let mut orchestrator = Orchestrator::new(endpointer, transcriber, context, transcript);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        signal.cancel();
    });

    info!("Listening. Press Ctrl-C to stop.");
    let transcript = orchestrator.run(capture, shutdown).await;

    if let Err(e) = synthesis.close().await {
        warn!("Synthesis connection did not close cleanly: {}", e);
    }
    engine.shutdown().context("failed to stop audio devices")?;

    let stats = orchestrator.stats();
    info!(
        "Session over: {} turns, stats {}",
        transcript.len(),
        serde_json::to_string(&stats)?
    );
    if engine.dropped_capture_frames() > 0 {
        warn!("{} capture frames were dropped", engine.dropped_capture_frames());
    }
    Ok(())
}

async fn self_test(cfg: Config, seconds: f64, output: PathBuf) -> Result<()> {
    let mut engine = AudioEngine::init(&cfg.audio).context("failed to start audio devices")?;
    info!("Recording {:.1}s, speak now", seconds);

    let report = engine
        .self_test(seconds, &output)
        .await
        .context("self-test failed")?;
    info!(
        "Self-test complete: {} frames, {:.1}s at {} Hz written to {}",
        report.frames_captured,
        report.duration_seconds,
        report.sample_rate,
        report.path.display()
    );

    engine.shutdown()?;
    Ok(())
}

fn devices() -> Result<()> {
    let devices = list_devices().context("failed to enumerate audio devices")?;
    println!("Input devices:");
    for name in &devices.inputs {
        println!("  {}", name);
    }
    println!("Output devices:");
    for name in &devices.outputs {
        println!("  {}", name);
    }
    Ok(())
}
