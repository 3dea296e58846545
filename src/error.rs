//! Rich diagnostic error types for the exercise tree synchronizer.
//!
//! Each layer defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so the CLI can tell users what went
//! wrong with the store, a mutation, or the local configuration.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::paths::PathError;

/// Top-level error type for callers that want a single error.
#[derive(Debug, Error, Diagnostic)]
pub enum ExTreeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Failures reported by an [`ExerciseStore`](crate::client::ExerciseStore).
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("store rejected the request ({status}): {message}")]
    #[diagnostic(
        code(extree::store::rejected),
        help(
            "The store answered with a non-success response. \
             The local change was rolled back; check the message and retry."
        )
    )]
    Rejected { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_secs}s: {message}")]
    #[diagnostic(
        code(extree::store::rate_limited),
        help("Too many requests. Wait for the indicated duration before retrying.")
    )]
    RateLimited {
        retry_after_secs: u64,
        message: String,
    },

    #[error("not authorized: {message}")]
    #[diagnostic(
        code(extree::store::unauthorized),
        help("The bearer token is missing or expired. Log in again and update `token` in the config.")
    )]
    Unauthorized { message: String },

    #[error("unexpected store failure: {message}")]
    #[diagnostic(
        code(extree::store::unexpected),
        help("The store could not be reached or sent a response that could not be parsed. Is the API running?")
    )]
    Unexpected { message: String },
}

impl StoreError {
    /// HTTP-like status code, when the store produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Unauthorized { .. } => Some(401),
            Self::Unexpected { .. } => None,
        }
    }

    /// How long to wait before retrying, for throttled requests.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Failures of an orchestrated mutation. Whenever one of these is returned
/// the optimistic change has already been rolled back.
#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("store response did not contain the created exercise (parent {parent}, position {position})")]
    #[diagnostic(
        code(extree::sync::missing_created),
        help(
            "The batch was accepted but the new exercise was not echoed back. \
             Reload the day to see what the store actually holds."
        )
    )]
    MissingCreated { parent: String, position: u32 },

    #[error("exercise {id} is still being created")]
    #[diagnostic(
        code(extree::sync::pending),
        help("Wait until the exercise has been saved before changing it or adding children to it.")
    )]
    Pending { id: String },

    #[error("no position left after the last sibling (parent {parent})")]
    #[diagnostic(
        code(extree::sync::position_exhausted),
        help("A sibling already sits at the highest possible position. Renumber or remove it before adding more.")
    )]
    PositionExhausted { parent: String },
}

impl SyncError {
    /// Retry hint carried over from a throttled store call.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Store(e) => e.retry_after(),
            _ => None,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
