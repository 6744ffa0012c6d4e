//! Error types for feed operations.
//!
//! This module defines [`FeedError`] which covers every failure the fetch layer,
//! the batch downloader and the streaming client can surface. The type is
//! `Clone` so that one result can be handed to every waiter of a shared request.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the remote service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Credential acquisition or refresh failed, or the server rejected them.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server throttled the request.
    #[error("Rate limited: retry after {retry_after:?}")]
    RateLimited {
        /// Suggested time to wait before retrying, if the server sent one.
        retry_after: Option<Duration>,
    },

    /// Retryable transport failure or 5xx response.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other 4xx response. Never retried.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Request url or server message.
        message: String,
    },

    /// A single stream frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The resource was explicitly closed.
    #[error("Resource is closed")]
    Closed,

    /// The streaming connection could not be established.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The job was cancelled before it produced a value.
    #[error("Cancelled")]
    Cancelled,

    /// The operation is not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl FeedError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Returns true for authentication-class failures.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Server supplied retry hint, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classifies a non-success HTTP status into an error.
    ///
    /// Returns `None` for 2xx and 3xx statuses.
    #[must_use]
    pub fn from_status(status: u16, url: &str, retry_after: Option<Duration>) -> Option<Self> {
        match status {
            200..=399 => None,
            401 | 403 => Some(Self::Auth(format!("HTTP {status} for {url}"))),
            404 => Some(Self::NotFound(url.to_string())),
            429 => Some(Self::RateLimited { retry_after }),
            400..=499 => Some(Self::Http {
                status,
                message: url.to_string(),
            }),
            _ => Some(Self::Transient(format!("HTTP {status} for {url}"))),
        }
    }
}

/// Result type alias using [`FeedError`].
pub type Result<T> = std::result::Result<T, FeedError>;
