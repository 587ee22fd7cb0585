//! Engine error types.

use shelfscan_models::{DetectionError, ItemId};
use thiserror::Error;

use crate::registrar::RegistrarError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Detection feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Upstream failure of the detection feed. Fatal to the frame loop.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Failed to read detection feed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: malformed frame: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Line {line}: invalid detection #{index}: {source}")]
    InvalidDetection {
        line: usize,
        index: usize,
        #[source]
        source: DetectionError,
    },
}

/// A synonym row could not be checked or written. Logged, never retried.
#[derive(Debug, Error)]
#[error("Synonym '{term}' for {item_id} not written: {source}")]
pub struct SynonymWriteError {
    pub term: String,
    pub item_id: ItemId,
    #[source]
    pub source: RegistrarError,
}
