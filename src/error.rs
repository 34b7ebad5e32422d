//! Crate-level error type.
//!
//! Per-record processing inside the drain loop never produces one of these —
//! malformed records are logged and counted, not propagated. `ArgusError`
//! only surfaces from one-shot setup paths: configuration loading and
//! socket binding.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgusError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to bind subscription endpoint on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

pub type ArgusResult<T> = Result<T, ArgusError>;
