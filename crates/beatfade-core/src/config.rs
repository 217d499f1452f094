//! Configuration file support for beatfade
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/beatfade/config.toml`
//! - macOS: `~/Library/Application Support/beatfade/config.toml`
//! - Windows: `%APPDATA%\beatfade\config.toml`
//!
//! Every key is optional; missing keys take their default.

use crate::error::{AutomationError, Result};
use crate::timing::TimeSignature;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Nominal period of the host tick in milliseconds
    pub tick_interval_ms: u64,
    /// Emit fade progress every Nth tick
    pub progress_every_ticks: u32,
    /// Fade length in bars used until a target sets its own
    pub default_fade_bars: f64,
    /// Shortest fade allowed, in seconds
    pub min_fade_seconds: f64,
    /// End value of an increasing track-volume fade (0 dB)
    pub fade_up_ceiling: f64,
    pub beats_per_bar: u32,
    pub beat_unit: u32,
    /// Tempo assumed until the host reports one
    pub initial_tempo: f64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            progress_every_ticks: 5,
            default_fade_bars: 24.0,
            min_fade_seconds: 0.05,
            fade_up_ceiling: 0.85,
            beats_per_bar: 4,
            beat_unit: 4,
            initial_tempo: 120.0,
        }
    }
}

impl AutomationConfig {
    /// Load configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AutomationError::Config(format!(
                "Config file not found at {:?}",
                path
            )));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from `path`, or the default location when `None`,
    /// falling back to defaults on any error.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Ok(p) => p,
                Err(_) => return Self::default(),
            },
        };
        match Self::load(&path) {
            Ok(config) => config,
            Err(AutomationError::Config(_)) => Self::default(),
            Err(err) => {
                log::warn!("[CONFIG] Ignoring {:?}: {}", path, err);
                Self::default()
            }
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AutomationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(AutomationError::Config(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.default_fade_bars.is_finite() && self.default_fade_bars > 0.0) {
            return Err(AutomationError::Config(format!(
                "default_fade_bars must be positive, got {}",
                self.default_fade_bars
            )));
        }
        if !(self.min_fade_seconds.is_finite() && self.min_fade_seconds > 0.0) {
            return Err(AutomationError::Config(format!(
                "min_fade_seconds must be positive, got {}",
                self.min_fade_seconds
            )));
        }
        if self.beats_per_bar == 0 || self.beat_unit == 0 {
            return Err(AutomationError::Config(
                "time signature must be non-zero".to_string(),
            ));
        }
        if !(self.initial_tempo.is_finite() && self.initial_tempo > 0.0) {
            return Err(AutomationError::Config(format!(
                "initial_tempo must be positive, got {}",
                self.initial_tempo
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature::new(self.beats_per_bar, self.beat_unit)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "beatfade") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(AutomationError::Config(
                "Could not determine config directory".to_string(),
            ))
        }
    }

    /// Create a default config file with comments at the default location
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::default_path()?;
        Self::write_default_config_file(&path)?;
        Ok(path)
    }

    /// Write the commented default config file to `path`
    pub fn write_default_config_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# beatfade configuration file

# Host tick period in milliseconds
tick_interval_ms = 100

# Send fade progress to the remote every Nth tick
progress_every_ticks = 5

# Fade length in bars until a control sets its own
default_fade_bars = 24.0

# Shortest fade in seconds
min_fade_seconds = 0.05

# Track volume reached by an increasing fade (0.85 = 0 dB)
fade_up_ceiling = 0.85

# Time signature used for bar lengths
beats_per_bar = 4
beat_unit = 4

# Tempo until the host reports one
initial_tempo = 120.0
"#;
