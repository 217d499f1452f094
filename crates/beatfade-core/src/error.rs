//! Error types for the beatfade-core crate.

use crate::target::TargetKey;
use thiserror::Error;

/// Result type alias for automation operations.
pub type Result<T> = std::result::Result<T, AutomationError>;

/// Errors that can occur while driving fades and programs.
///
/// Unknown targets and step-table gaps are recovered locally and never
/// surface here.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// A fade length of zero, negative or non-finite bars was requested.
    #[error("Invalid fade duration: {bars} bars")]
    InvalidDuration { bars: f64 },

    /// The host refused a parameter write.
    #[error("Host rejected write to {target}: {reason}")]
    HostWriteRejected { target: TargetKey, reason: String },

    /// The host reported a tempo that cannot be used for timing.
    #[error("Invalid tempo: {bpm} BPM")]
    InvalidTempo { bpm: f64 },

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl AutomationError {
    /// Whether the failed operation should simply be retried on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AutomationError::HostWriteRejected { .. })
    }
}
