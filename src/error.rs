//! Error types for the drainguard crate.
//!
//! This module defines the crate-level error type covering storage,
//! configuration and telemetry decoding failures. The estimation core
//! itself has no failure modes; degenerate arithmetic resolves by policy.

use thiserror::Error;

/// Main error type for the drainguard crate.
#[derive(Error, Debug)]
pub enum DrainGuardError {
   #[error("State store error: {0}")]
   Store(#[from] crate::store::Error),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Invalid telemetry record: {0}")]
   InvalidTelemetry(#[from] serde_json::Error),
}

/// Convenience type alias for Results with `DrainGuardError`.
pub type Result<T> = std::result::Result<T, DrainGuardError>;
