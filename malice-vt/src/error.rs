//! Error types for report resolution
//!
//! Every failure the resolver can surface is a [`VtError`]. Callers that only
//! need to decide between aborting, retrying and degrading should match on
//! [`VtError::kind`] instead of the individual variants.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`VtError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad artifact path, hash syntax or a duplicate in-flight request
    InvalidInput,
    /// Network or HTTP status failure
    TransportError,
    /// The service quota was exhausted more often than the retry budget allows
    RateLimited,
    /// The response body did not match the expected schema
    ProtocolError,
    /// The service answered with a negative response code
    ServiceError,
    /// The report never became available within the polling budget
    Pending,
    /// The caller's wall-clock bound expired
    Timeout,
}

impl ErrorKind {
    /// Whether the caller may retry the same request after backing off
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransportError | ErrorKind::RateLimited)
    }

    /// Whether the outcome is "no verdict yet" rather than a failure
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, ErrorKind::Pending | ErrorKind::Timeout)
    }

    /// Get a stable lowercase name for logs and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::ServiceError => "service_error",
            ErrorKind::Pending => "pending",
            ErrorKind::Timeout => "timeout",
        }
    }
}

/// Errors produced while submitting artifacts and fetching reports
#[derive(Debug, Error)]
pub enum VtError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a report request for {resource} is already in flight")]
    InFlight { resource: String },

    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{context}: HTTP {status}")]
    HttpStatus {
        context: String,
        status: reqwest::StatusCode,
    },

    #[error("request quota exhausted after {attempts} rate-limited attempts")]
    RateLimited { attempts: u32 },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("service returned response code {code}: {message}")]
    Service { code: i64, message: String },

    #[error("report for {resource} still pending after {waited:?}")]
    Pending { resource: String, waited: Duration },

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),
}

impl VtError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            VtError::InvalidInput(_) | VtError::InFlight { .. } => ErrorKind::InvalidInput,
            VtError::Transport { .. } | VtError::HttpStatus { .. } => ErrorKind::TransportError,
            VtError::RateLimited { .. } => ErrorKind::RateLimited,
            VtError::Protocol(_) => ErrorKind::ProtocolError,
            VtError::Service { .. } => ErrorKind::ServiceError,
            VtError::Pending { .. } => ErrorKind::Pending,
            VtError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub(crate) fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        VtError::Transport {
            context: context.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for VtError {
    fn from(err: serde_json::Error) -> Self {
        VtError::Protocol(err.to_string())
    }
}
