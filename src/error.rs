//! Error taxonomy for engines, providers and the task lifecycle.
//!
//! Individual engine/provider failures are recoverable inside the router and
//! the provider chain; only aggregated failures reach the task manager, which
//! records them on the task as an [`ErrorKind`] plus a readable message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Serializable classification of a failure, stored on errored tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EngineUnavailable,
    EngineInvocationFailed,
    AllEnginesUnavailable,
    AllEnginesFailed,
    PollTimeout,
    TooManyConsecutiveErrors,
    EmptyResult,
    ProviderUnavailable,
    ProviderInvocationFailed,
    ProviderTimeout,
    ProcessStartFailed,
    Cancelled,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EngineUnavailable => "engine_unavailable",
            Self::EngineInvocationFailed => "engine_invocation_failed",
            Self::AllEnginesUnavailable => "all_engines_unavailable",
            Self::AllEnginesFailed => "all_engines_failed",
            Self::PollTimeout => "poll_timeout",
            Self::TooManyConsecutiveErrors => "too_many_consecutive_errors",
            Self::EmptyResult => "empty_result",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderInvocationFailed => "provider_invocation_failed",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProcessStartFailed => "process_start_failed",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Failures raised by transcription engines, the poller and the router.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine {engine} is unavailable")]
    Unavailable { engine: String },

    #[error("engine {engine} failed: {detail}")]
    InvocationFailed { engine: String, detail: String },

    #[error("no transcription engine is available")]
    AllEnginesUnavailable,

    #[error("all transcription engines failed, last error: {last_error}")]
    AllEnginesFailed { last_error: String },

    #[error("transcription did not finish after {attempts} polls ({elapsed_secs}s)")]
    PollTimeout { attempts: u32, elapsed_secs: u64 },

    #[error("giving up after {count} consecutive status errors: {last_error}")]
    TooManyConsecutiveErrors { count: u32, last_error: String },

    #[error("engine reported success but produced no text")]
    EmptyResult,

    #[error("local worker failed to start: {0}")]
    ProcessStartFailed(String),

    #[error("transcription was cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn invocation(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvocationFailed {
            engine: engine.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::EngineUnavailable,
            Self::InvocationFailed { .. } => ErrorKind::EngineInvocationFailed,
            Self::AllEnginesUnavailable => ErrorKind::AllEnginesUnavailable,
            Self::AllEnginesFailed { .. } => ErrorKind::AllEnginesFailed,
            Self::PollTimeout { .. } => ErrorKind::PollTimeout,
            Self::TooManyConsecutiveErrors { .. } => ErrorKind::TooManyConsecutiveErrors,
            Self::EmptyResult => ErrorKind::EmptyResult,
            Self::ProcessStartFailed(_) => ErrorKind::ProcessStartFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failures raised by summary providers. Never terminal to the caller.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider {provider} is unavailable")]
    Unavailable { provider: String },

    #[error("provider {provider} failed: {detail}")]
    InvocationFailed { provider: String, detail: String },

    #[error("provider {provider} timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },
}

impl ProviderError {
    pub fn invocation(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvocationFailed {
            provider: provider.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::ProviderUnavailable,
            Self::InvocationFailed { .. } => ErrorKind::ProviderInvocationFailed,
            Self::Timeout { .. } => ErrorKind::ProviderTimeout,
        }
    }
}

/// Classification of an upstream HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// 429 - transient
    RateLimited,
    /// 5xx - transient
    ServerError,
    /// 404 - the addressed resource is gone
    NotFound,
    /// Other 4xx - permanent
    ClientError,
}

impl HttpErrorKind {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError)
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> HttpErrorKind {
    match status {
        429 => HttpErrorKind::RateLimited,
        404 => HttpErrorKind::NotFound,
        400..=499 => HttpErrorKind::ClientError,
        _ => HttpErrorKind::ServerError,
    }
}

/// Describe a reqwest transport error the way upstream failures are logged.
pub fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("Request timeout: {}", e)
    } else if e.is_connect() {
        format!("Connection failed: {}", e)
    } else {
        format!("Request failed: {}", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), HttpErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), HttpErrorKind::ServerError);
        assert_eq!(classify_http_status(503), HttpErrorKind::ServerError);
        assert_eq!(classify_http_status(404), HttpErrorKind::NotFound);
        assert_eq!(classify_http_status(400), HttpErrorKind::ClientError);
        assert_eq!(classify_http_status(401), HttpErrorKind::ClientError);
    }

    #[test]
    fn test_transient_classification() {
        assert!(HttpErrorKind::RateLimited.is_transient());
        assert!(HttpErrorKind::ServerError.is_transient());
        assert!(!HttpErrorKind::NotFound.is_transient());
        assert!(!HttpErrorKind::ClientError.is_transient());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            EngineError::AllEnginesFailed {
                last_error: "boom".into()
            }
            .kind(),
            ErrorKind::AllEnginesFailed
        );
        assert_eq!(EngineError::EmptyResult.kind(), ErrorKind::EmptyResult);
        assert_eq!(
            ProviderError::Timeout {
                provider: "ollama".into(),
                secs: 1
            }
            .kind(),
            ErrorKind::ProviderTimeout
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::PollTimeout).unwrap(),
            "\"poll_timeout\""
        );
    }

    #[test]
    fn test_aggregated_message_carries_last_error() {
        let err = EngineError::AllEnginesFailed {
            last_error: "engine cloud failed: HTTP 500".into(),
        };
        assert!(err.to_string().contains("HTTP 500"));
    }
}
