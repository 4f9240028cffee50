//! Auscult - record a stethoscope/microphone capture to WAV
//!
//! Captures from the default (or named) input device until the time limit
//! or Ctrl-C, then writes a mono 16-bit PCM WAV at the target rate.

use anyhow::{Context, Result};
use auscult::audio::{list_input_devices, wav};
use auscult::{CaptureConfig, CaptureError, CaptureSession, CpalMicrophone, WavHeader};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "auscult", version, about = "Record microphone audio to a 16-bit PCM WAV")]
struct Args {
    /// Stop automatically after this many seconds
    #[arg(short, long, default_value_t = 20)]
    seconds: u64,

    /// Sample rate of the written WAV
    #[arg(short = 'r', long, default_value_t = wav::DEFAULT_TARGET_SAMPLE_RATE)]
    target_rate: u32,

    /// Input device name (defaults to the system input)
    #[arg(short, long)]
    device: Option<String>,

    /// Output WAV path
    #[arg(short, long, default_value = "recording.wav")]
    output: PathBuf,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auscult=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("Auscult v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        for device in list_input_devices() {
            println!("{}", device);
        }
        return Ok(());
    }

    let microphone = match &args.device {
        Some(name) => CpalMicrophone::with_device(name.clone()),
        None => CpalMicrophone::new(),
    };
    let config = CaptureConfig {
        target_sample_rate: args.target_rate,
        ..Default::default()
    };
    let session = CaptureSession::new(Arc::new(microphone), config)?;

    if let Err(e) = session.start().await {
        match &e {
            CaptureError::DeviceUnavailable(_) => {
                tracing::error!("No microphone found. Connect an input device and retry.")
            }
            CaptureError::PermissionDenied(_) => {
                tracing::error!("Microphone access was denied. Grant access in system settings.")
            }
            _ => {}
        }
        return Err(e).context("Failed to start capture");
    }

    tracing::info!("Recording for up to {}s, press Ctrl-C to stop early", args.seconds);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.seconds)) => {
            tracing::info!("Time limit reached");
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("Ctrl-C handler failed, stopping: {}", e);
            } else {
                tracing::info!("Interrupted");
            }
        }
    }

    let bytes = session.stop().await.context("Failed to finalize capture")?;
    let header = WavHeader::parse(&bytes).context("Produced WAV failed validation")?;

    std::fs::write(&args.output, &bytes)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    tracing::info!(
        "Wrote {} ({:.1}s, {} samples @ {}Hz, {} bytes)",
        args.output.display(),
        header.duration().as_secs_f64(),
        header.sample_count(),
        header.sample_rate,
        bytes.len()
    );

    Ok(())
}
