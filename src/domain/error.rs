use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::domain::session::SessionState;

/// Why a single model or provider call failed.
///
/// This is a closed table: every failure an adapter observes is mapped to
/// exactly one kind, and the kind alone decides whether routing continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Rate limit or quota exhaustion (HTTP 429, `RESOURCE_EXHAUSTED`).
    RateLimited,
    /// Endpoint overloaded (HTTP 503, `UNAVAILABLE`).
    Overloaded,
    /// Endpoint temporarily unavailable (HTTP 500/502/504).
    Unavailable,
    /// Model or endpoint not found (HTTP 404, `NOT_FOUND`).
    NotFound,
    /// Permission or authorization denied (HTTP 401/403, `PERMISSION_DENIED`).
    PermissionDenied,
    /// Request rejected for another client-side reason (other 4xx).
    InvalidRequest,
    /// Response body could not be parsed or had the wrong shape.
    Malformed,
    /// Response parsed but carried no extractable content.
    EmptyContent,
    /// Connection, timeout or egress policy failure.
    Transport,
}

impl FailureKind {
    /// Map an HTTP status code to a failure kind.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            429 => FailureKind::RateLimited,
            503 => FailureKind::Overloaded,
            500 | 502 | 504 => FailureKind::Unavailable,
            404 => FailureKind::NotFound,
            401 | 403 => FailureKind::PermissionDenied,
            400..=499 => FailureKind::InvalidRequest,
            _ => FailureKind::Unavailable,
        }
    }

    /// Map a machine-readable provider status (e.g. Google RPC codes).
    ///
    /// Returns `None` for values outside the table so the HTTP status decides.
    pub fn from_provider_status(status: &str) -> Option<Self> {
        match status {
            "RESOURCE_EXHAUSTED" => Some(FailureKind::RateLimited),
            "UNAVAILABLE" => Some(FailureKind::Overloaded),
            "NOT_FOUND" => Some(FailureKind::NotFound),
            "PERMISSION_DENIED" | "UNAUTHENTICATED" => Some(FailureKind::PermissionDenied),
            "INTERNAL" | "DEADLINE_EXCEEDED" => Some(FailureKind::Unavailable),
            "INVALID_ARGUMENT" | "FAILED_PRECONDITION" => Some(FailureKind::InvalidRequest),
            _ => None,
        }
    }

    /// Fatal failures abort routing; everything else moves on to the next candidate.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::PermissionDenied)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::RateLimited => "rate limited",
            FailureKind::Overloaded => "overloaded",
            FailureKind::Unavailable => "unavailable",
            FailureKind::NotFound => "not found",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::InvalidRequest => "invalid request",
            FailureKind::Malformed => "malformed response",
            FailureKind::EmptyContent => "empty content",
            FailureKind::Transport => "transport error",
        };
        f.write_str(name)
    }
}

/// A classified failure from one provider call.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}: {message}", status_suffix(.status))]
pub struct ProviderError {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl ProviderError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP error response.
    ///
    /// A structured provider status wins over the HTTP code when both exist.
    pub fn from_http(status: u16, provider_status: Option<&str>, message: impl Into<String>) -> Self {
        let kind = provider_status
            .and_then(FailureKind::from_provider_status)
            .unwrap_or_else(|| FailureKind::from_http_status(status));
        Self {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(FailureKind::EmptyContent, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// One failed attempt recorded while exhausting the candidate list.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub endpoint: String,
    pub error: ProviderError,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.error)
    }
}

fn join_attempts(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Domain-level errors for Refyna.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network request blocked: {reason}")]
    NetworkBlocked { reason: String },

    #[error("HTTP request failed: {0}")]
    HttpRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Missing secret: {0}")]
    MissingSecret(String),

    #[error("Endpoint {endpoint} failed: {source}")]
    Provider {
        endpoint: String,
        #[source]
        source: ProviderError,
    },

    #[error("All backends exhausted after {} attempts: {}", .attempts.len(), join_attempts(.attempts))]
    AllBackendsExhausted { attempts: Vec<FailedAttempt> },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Quiz generation error: {0}")]
    Quiz(String),

    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    #[error("Invalid session state transition from {from:?} to {to:?}")]
    SessionStateTransition { from: SessionState, to: SessionState },

    #[error("Realtime session error: {0}")]
    Realtime(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl DomainError {
    /// The classified provider failure behind this error, if any.
    pub fn provider_failure(&self) -> Option<&ProviderError> {
        match self {
            DomainError::Provider { source, .. } => Some(source),
            DomainError::AllBackendsExhausted { attempts } => attempts.last().map(|a| &a.error),
            _ => None,
        }
    }

    /// True when the error is (or ends with) a rate limit.
    pub fn is_rate_limited(&self) -> bool {
        self.provider_failure()
            .is_some_and(|e| e.kind == FailureKind::RateLimited)
    }

    /// True when the error aborted routing because of a permission failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DomainError::Provider { source, .. } if source.is_fatal())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for DomainError {
    fn from(err: toml::de::Error) -> Self {
        DomainError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for DomainError {
    fn from(err: toml::ser::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for DomainError {
    fn from(err: base64::DecodeError) -> Self {
        DomainError::Decode(err.to_string())
    }
}
