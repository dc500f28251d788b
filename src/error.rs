//! Configuration and fatal-startup error types. Grounded in the
//! `thiserror` usage pattern from `andihsu-gm-quic` and
//! `hlieu5402-collab-spark2026`, rather than a bare `Result<_, ()>` +
//! `tracing::error!` pattern, since a config surface this large benefits
//! from distinguishable error variants.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("unknown FEC policy name {0:?}")]
    UnknownPolicy(String),

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: String },

    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange { field: &'static str, min: f64, max: f64, value: f64 },

    #[error("cannot open hairpin table {path}: {source}")]
    HairpinTable { path: PathBuf, source: io::Error },

    #[error("hairpin table {path} has wrong size: expected {expected} bytes, got {actual}")]
    HairpinTableSize { path: PathBuf, expected: usize, actual: usize },
}
