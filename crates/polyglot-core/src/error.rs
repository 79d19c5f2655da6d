//! Error taxonomy for the core data model, transport and config layers.
//!
//! Each leaf module gets its own `thiserror` enum; `anyhow` is reserved for
//! the `polyglot-daemon` binary's `main()` and for integration tests.

use std::path::PathBuf;
use thiserror::Error;

/// A line of child stdio/broker traffic could not be decoded into a `Message`.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("malformed JSON on line: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error writing to child stdin: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("transport is closed")]
    Closed,

    #[error("broker topic {topic} has no subscriber")]
    NoSubscriber { topic: String },
}

/// Errors from reading or writing `configuration.json`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("password field {field} is not valid base64: {source}")]
    BadPassword {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("config writer task is no longer running")]
    WriterGone,
}
