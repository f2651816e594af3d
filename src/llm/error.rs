use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Normalized failure categories shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConfigError,
    RateLimit,
    AuthError,
    InvalidRequest,
    Timeout,
    ContentFilter,
    StreamError,
    UnknownError,
}

impl ErrorKind {
    pub fn retryable(&self) -> bool {
        match self {
            Self::ConfigError => false,
            Self::RateLimit => true,
            Self::AuthError => false,
            Self::InvalidRequest => false,
            Self::Timeout => true,
            Self::ContentFilter => false,
            Self::StreamError => true,
            Self::UnknownError => true,
        }
    }

    /// HTTP-equivalent status reported to callers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ConfigError => 503,
            Self::RateLimit => 429,
            Self::AuthError => 401,
            Self::InvalidRequest => 400,
            Self::Timeout => 504,
            Self::ContentFilter => 422,
            Self::StreamError => 502,
            Self::UnknownError => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::RateLimit => "RATE_LIMIT",
            Self::AuthError => "AUTH_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Timeout => "TIMEOUT",
            Self::ContentFilter => "CONTENT_FILTER",
            Self::StreamError => "STREAM_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the backend client layer.
///
/// Backend-native failures (HTTP statuses, transport errors, error bodies)
/// are always converted into one of these before leaving an adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Config(String),
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Content filtered: {0}")]
    ContentFilter(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Backend error: {0}")]
    Unknown(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::ConfigError,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Auth(_) => ErrorKind::AuthError,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ContentFilter(_) => ErrorKind::ContentFilter,
            Self::Stream(_) => ErrorKind::StreamError,
            Self::Unknown(_) => ErrorKind::UnknownError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().retryable()
    }

    /// Map an HTTP error status and its body to a normalized error.
    ///
    /// `hint` is the backend's own error type/code when the body carried one
    /// (`rate_limit_error`, `RESOURCE_EXHAUSTED`, `content_filter`, ...).
    pub fn from_status(
        status: StatusCode,
        message: String,
        hint: Option<&str>,
        retry_after: Option<Duration>,
    ) -> Self {
        let hint = hint.unwrap_or_default().to_lowercase();
        let lowered = message.to_lowercase();

        if is_content_filter(&hint) || is_content_filter(&lowered) {
            return Self::ContentFilter(message);
        }

        match status.as_u16() {
            401 | 403 => Self::Auth(message),
            429 => Self::RateLimit {
                message,
                retry_after,
            },
            408 | 504 => Self::Timeout(message),
            400 | 404 | 413 | 422 => {
                if hint.contains("rate_limit") || hint.contains("resource_exhausted") {
                    Self::RateLimit {
                        message,
                        retry_after,
                    }
                } else {
                    Self::InvalidRequest(message)
                }
            }
            _ if hint.contains("authentication") || hint.contains("permission") => {
                Self::Auth(message)
            }
            _ => Self::Unknown(format!("HTTP {}: {}", status.as_u16(), message)),
        }
    }
}

fn is_content_filter(text: &str) -> bool {
    text.contains("content_filter")
        || text.contains("content filter")
        || text.contains("content policy")
        || text.contains("content_policy")
        || text.contains("safety")
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() || error.is_builder() {
            Self::Config(error.to_string())
        } else if error.is_decode() {
            Self::Unknown(format!("Failed to decode response: {}", error))
        } else {
            Self::Unknown(error.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(error: serde_json::Error) -> Self {
        Self::Unknown(format!("Malformed backend response: {}", error))
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
