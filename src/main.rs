//! capture-pipeline CLI
//!
//! Subcommands:
//! - `capture-pipeline record` - Record the synthetic source through FFmpeg
//! - `capture-pipeline targets` - List capturable displays and windows

use anyhow::{bail, Context, Result};
use capture_pipeline::{
    init_tracing, CaptureAdapter, FfmpegMuxer, RecorderSettings, RecordingEvent, RecordingState,
    SessionController, SyntheticCaptureProvider,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Parser)]
#[command(name = "capture-pipeline")]
#[command(about = "Screen and audio capture into MP4/MOV")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record for a fixed time, optionally pausing in between
    Record {
        /// JSON settings file; defaults apply when omitted
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Total wall-clock time to run, in seconds
        #[arg(long, default_value = "5")]
        seconds: f64,

        /// Pause after this many seconds
        #[arg(long, requires = "resume_at")]
        pause_at: Option<f64>,

        /// Resume after this many seconds
        #[arg(long, requires = "pause_at")]
        resume_at: Option<f64>,

        /// FFmpeg binary to encode with
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: PathBuf,
    },

    /// Print capturable content as JSON
    Targets,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Pause,
    Resume,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Record {
            settings,
            seconds,
            pause_at,
            resume_at,
            ffmpeg,
        } => record(settings, seconds, pause_at.zip(resume_at), ffmpeg).await,
        Commands::Targets => targets(),
    }
}

fn targets() -> Result<()> {
    let adapter = CaptureAdapter::new(Arc::new(SyntheticCaptureProvider::default()));
    let content = adapter.available_content()?;
    println!("{}", serde_json::to_string_pretty(&content)?);
    Ok(())
}

fn schedule(seconds: f64, pause: Option<(f64, f64)>) -> Result<Vec<(f64, Step)>> {
    let mut steps = Vec::new();
    if let Some((pause_at, resume_at)) = pause {
        if !(0.0 <= pause_at && pause_at < resume_at && resume_at < seconds) {
            bail!("need 0 <= --pause-at < --resume-at < --seconds");
        }
        steps.push((pause_at, Step::Pause));
        steps.push((resume_at, Step::Resume));
    }
    steps.push((seconds, Step::Stop));
    Ok(steps)
}

async fn record(
    settings: Option<PathBuf>,
    seconds: f64,
    pause: Option<(f64, f64)>,
    ffmpeg: PathBuf,
) -> Result<()> {
    let settings = match settings {
        Some(path) => RecorderSettings::load(&path)
            .with_context(|| format!("failed to load settings from {:?}", path))?,
        None => RecorderSettings::default(),
    };
    let config = settings.recording_config()?;
    let steps = schedule(seconds, pause)?;

    let muxer = FfmpegMuxer::new(&ffmpeg);
    if !muxer.is_available() {
        bail!("FFmpeg not found at {:?}", ffmpeg);
    }

    let adapter = CaptureAdapter::new(Arc::new(SyntheticCaptureProvider::default()));
    let controller = SessionController::new(adapter, Arc::new(muxer));

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RecordingEvent::StateChanged(state) => println!("state: {}", state),
                RecordingEvent::Retargeted(target) => println!("retargeted: {}", target),
                RecordingEvent::StreamFailed(reason) => eprintln!("stream failed: {}", reason),
            }
        }
    });

    let id = controller.start(config).await?;
    tracing::info!("Recording {} for {}s", id, seconds);
    let started = Instant::now();

    for (at, step) in steps {
        let deadline = started + Duration::from_secs_f64(at);
        let interrupted = tokio::select! {
            _ = sleep_until(deadline) => false,
            _ = tokio::signal::ctrl_c() => true,
        };
        if controller.state() == RecordingState::Failed {
            break;
        }
        match (interrupted, step) {
            (false, Step::Pause) => {
                controller.pause().await;
            }
            (false, Step::Resume) => {
                controller.resume().await;
            }
            _ => break,
        }
    }

    if controller.state() == RecordingState::Failed {
        let reason = controller
            .last_error()
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("recording failed: {}", reason);
    }

    let output = controller.stop().await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
