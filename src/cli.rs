//! Command-line interface for Tapeloop
//!
//! Handles argument parsing and logging configuration.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use tapeloop::settings::{Backend, Settings};

/// Tapeloop - chunked loop recorder
#[derive(Parser, Debug)]
#[command(name = "tapeloop")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace (includes per-chunk activity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Audio backend to drive
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Capture and playback rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Samples per recorded chunk
    #[arg(long)]
    pub chunk_samples: Option<usize>,

    /// Settings file (defaults to ~/.config/tapeloop/settings.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Settings::default_path)
    }

    /// Overlay command-line values on top of loaded settings
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(backend) = self.backend {
            settings.backend = backend;
        }
        if let Some(sample_rate) = self.sample_rate {
            settings.sample_rate = sample_rate;
        }
        if let Some(chunk_samples) = self.chunk_samples {
            settings.chunk_samples = chunk_samples;
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("tapeloop", args.log_level());

    builder.format_timestamp_millis().init();
}
