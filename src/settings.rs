//! Persistent recorder settings
//!
//! Settings are stored as JSON at ~/.config/tapeloop/settings.json

use crate::audio::dsp::DspSettings;
use crate::audio::SAMPLE_RATE;
use crate::error::{Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which device backend the binary drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// PipeWire microphone and speakers
    Pipewire,
    /// Test tone in, silence out
    Synthetic,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "pipewire") {
            Backend::Pipewire
        } else {
            Backend::Synthetic
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sample_rate: u32,
    pub chunk_samples: usize,
    /// Samples between progress reports; `sample_rate / 60` when unset.
    pub progress_period_samples: Option<usize>,
    pub backend: Backend,
    pub looped: bool,
    pub dsp: DspSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            chunk_samples: 2048,
            progress_period_samples: None,
            backend: Backend::default(),
            looped: false,
            dsp: DspSettings::default(),
        }
    }
}

impl Settings {
    /// Get the default settings path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tapeloop")
            .join("settings.json")
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to `path`, creating the parent directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if self.chunk_samples == 0 {
            return Err(Error::Config("chunk_samples must be positive".to_string()));
        }
        if self.progress_period_samples == Some(0) {
            return Err(Error::Config(
                "progress_period_samples must be positive".to_string(),
            ));
        }
        let cutoff = self.dsp.low_pass_cutoff_hz;
        if cutoff.is_nan() || cutoff <= 0.0 {
            return Err(Error::Config(
                "dsp.low_pass_cutoff_hz must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective playback progress period, in samples.
    pub fn progress_period(&self) -> usize {
        self.progress_period_samples
            .unwrap_or((self.sample_rate / 60) as usize)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tapeloop-settings-{}-{}", process::id(), name))
            .join("settings.json")
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = scratch_path("missing");
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_path("saved");
        let settings = Settings {
            sample_rate: 48_000,
            chunk_samples: 512,
            looped: true,
            dsp: DspSettings {
                gain_enabled: true,
                gain_db: 6.0,
                ..DspSettings::default()
            },
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = scratch_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "looped": true, "backend": "synthetic" }"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(settings.looped);
        assert_eq!(settings.backend, Backend::Synthetic);
        assert_eq!(settings.sample_rate, 44_100);
        assert_eq!(settings.chunk_samples, 2048);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let path = scratch_path("invalid");
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        fs::write(&path, "not json").unwrap();
        assert!(matches!(Settings::load(&path), Err(Error::Json(_))));

        fs::write(&path, r#"{ "chunk_samples": 0 }"#).unwrap();
        assert!(matches!(Settings::load(&path), Err(Error::Config(_))));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_progress_period_defaults_to_sixtieth_of_a_second() {
        let settings = Settings::default();
        assert_eq!(settings.progress_period(), 735);

        let custom = Settings {
            progress_period_samples: Some(100),
            ..Settings::default()
        };
        assert_eq!(custom.progress_period(), 100);
    }
}
