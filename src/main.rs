//! Tapeloop - a chunked loop recorder for Linux
//!
//! This is the main entry point for the interactive recorder.

mod cli;
mod shell;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use tapeloop::audio::backend::{NullSink, ToneCapture};
use tapeloop::audio::{AudioCaptureEngine, AudioPlaybackEngine, CaptureBackend, PlaybackBackend};
use tapeloop::settings::{Backend, Settings};
use tapeloop::PlaybackController;

type Backends = (Arc<dyn CaptureBackend<f32>>, Arc<dyn PlaybackBackend<f32>>);

fn open_backends(settings: &Settings) -> anyhow::Result<Backends> {
    let rate = settings.sample_rate;
    let chunk = settings.chunk_samples;
    match settings.backend {
        Backend::Synthetic => {
            let capture: Arc<dyn CaptureBackend<f32>> = Arc::new(ToneCapture::new(rate, chunk));
            let playback: Arc<dyn PlaybackBackend<f32>> = Arc::new(NullSink::new(rate));
            Ok((capture, playback))
        }
        #[cfg(feature = "pipewire")]
        Backend::Pipewire => {
            let backend = Arc::new(tapeloop::audio::backend::PipeWireBackend::new(rate, chunk));
            let capture: Arc<dyn CaptureBackend<f32>> = backend.clone();
            let playback: Arc<dyn PlaybackBackend<f32>> = backend;
            Ok((capture, playback))
        }
        #[cfg(not(feature = "pipewire"))]
        Backend::Pipewire => {
            anyhow::bail!("built without PipeWire support, use --backend synthetic")
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    let config_path = args.config_path();
    let mut settings = Settings::load(&config_path).unwrap_or_else(|e| {
        warn!("Ignoring settings at {}: {}", config_path.display(), e);
        Settings::default()
    });
    args.apply(&mut settings);
    settings.validate().context("Invalid command-line settings")?;

    info!(
        "Starting Tapeloop ({:?} backend, {} Hz, {} samples per chunk)",
        settings.backend, settings.sample_rate, settings.chunk_samples
    );

    let (capture, playback) = open_backends(&settings)?;
    let capture = AudioCaptureEngine::new(capture);
    let playback = AudioPlaybackEngine::new(playback, settings.progress_period());

    let mut controller = PlaybackController::new(capture, playback);
    controller.set_looped(settings.looped);
    controller.set_settings(settings.dsp);

    let settings = shell::Shell::new(controller, settings).run(shell::spawn_stdin_reader());

    settings
        .save(&config_path)
        .with_context(|| format!("Failed to save settings to {}", config_path.display()))?;
    info!("Settings saved to {}", config_path.display());
    Ok(())
}
