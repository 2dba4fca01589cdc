use serde::Serialize;
use shared::error::{ErrorCode, ValidationError};
use thiserror::Error;

/// Read-side failure. Kept on the exposed state; never thrown into rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedError {
    #[error("subscription to '{path}' failed: {message}")]
    Subscription { path: String, message: String },
    #[error("feed is unavailable: {0}")]
    Unavailable(String),
}

impl FeedError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::FeedSubscription
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Subscription { path, .. } => Some(path),
            Self::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("write to '{path}' failed: {source}")]
pub struct RemoteWriteError {
    pub path: String,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    RemoteWrite(#[from] RemoteWriteError),
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::RemoteWrite(_) => ErrorCode::RemoteWrite,
        }
    }
}

/// Absorbed internally; only ever causes the templated fallback text.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("text generation failed: {0}")]
    Generation(#[source] anyhow::Error),
    #[error("text generation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("text generation returned an empty summary")]
    Empty,
}

impl SummaryError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::SummaryGeneration
    }
}
