//! Recorder configuration.
//!
//! [`ConfigStore`] is the flat key/value provider every component reads from.
//! Components never read keys ad hoc during a cycle: they take one immutable
//! [`RecorderConfig`] snapshot at the start of the cycle, so settings cannot
//! change under a running cycle.

pub mod keys;
mod settings;
mod store;

pub use settings::{
    ArchiveSettings, BreakerSettings, DedupSettings, HealthSettings, IdleSettings, ModeSettings,
    RecorderConfig, RetentionSettings, RingSettings, SamplerSettings, SheddingSettings,
    ThrottleSettings,
};
pub use store::ConfigStore;

/// Error type for configuration loading and validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A key holds a value that cannot be used.
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    /// A cross-key invariant is violated.
    Invariant(String),
    /// Configuration file could not be read or parsed.
    Io(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value, reason } => {
                write!(f, "invalid value '{}' for {}: {}", value, key, reason)
            }
            ConfigError::Invariant(msg) => write!(f, "configuration invariant violated: {}", msg),
            ConfigError::Io(msg) => write!(f, "configuration file: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
