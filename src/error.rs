//! Error types and rate-limit classification of failed saves.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MAX_RETRY_AFTER_SECS;

static RETRY_AFTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"retry_after["':]*\s*(\d+)"#).expect("retry_after pattern compiles")
});

const RATE_LIMIT_MARKERS: &[&str] = &["429", "RATE_LIMIT", "Too many requests"];

// ============================================================================
// Save errors
// ============================================================================

/// How the sync engine should react to a failed save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveErrorKind {
    /// The server asked us to slow down. Retried at the server's cadence,
    /// never counted against the retry budget.
    RateLimited { retry_after: Option<Duration> },
    /// Network blips, timeouts, 5xx. Retried with a fixed delay.
    Transient,
    /// Retrying cannot help (validation, auth, 4xx).
    Fatal,
}

impl SaveErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Transient => "TRANSIENT",
            Self::Fatal => "FATAL",
        }
    }

    #[must_use]
    pub const fn is_rate_limited(self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

/// Error returned by a [`RemoteSave`](crate::capabilities::RemoteSave) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{}] {message}", .kind.code())]
pub struct SaveError {
    pub kind: SaveErrorKind,
    pub message: String,
}

impl SaveError {
    #[must_use]
    pub fn new(kind: SaveErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SaveErrorKind::Transient, message)
    }

    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(SaveErrorKind::Fatal, message)
    }

    #[must_use]
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::new(
            SaveErrorKind::RateLimited { retry_after },
            "Too many requests",
        )
    }

    /// Classifies a free-form error message the way backend functions
    /// report throttling: any of `429`, `RATE_LIMIT` or `Too many requests`
    /// marks a rate limit, and an embedded `retry_after: N` gives the wait
    /// in seconds. Everything else is transient.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if is_rate_limit_message(&message) {
            SaveErrorKind::RateLimited {
                retry_after: parse_retry_after(&message),
            }
        } else {
            SaveErrorKind::Transient
        };
        Self::new(kind, message)
    }

    /// Maps an HTTP status (and optional JSON body) to a save error.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let parsed = body.and_then(|b| serde_json::from_slice::<ApiErrorBody>(b).ok());

        let message = parsed
            .as_ref()
            .and_then(|b| b.message.clone())
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        let kind = match status {
            429 => SaveErrorKind::RateLimited {
                retry_after: parsed
                    .as_ref()
                    .and_then(|b| b.retry_after)
                    .map(clamp_retry_after)
                    .or_else(|| parse_retry_after(&message)),
            },
            408 | 500..=599 => SaveErrorKind::Transient,
            400..=499 => SaveErrorKind::Fatal,
            _ => SaveErrorKind::Transient,
        };

        Self::new(kind, message)
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        self.kind.is_rate_limited()
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            SaveErrorKind::RateLimited { retry_after } => retry_after,
            _ => None,
        }
    }
}

impl From<FetchError> for SaveError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Server { status, message } => {
                let mut err = Self::from_http_status(status, None);
                err.message = message;
                err
            }
            FetchError::Decode(msg) => Self::fatal(msg),
            FetchError::Network(msg) => Self::from_message(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
}

fn is_rate_limit_message(message: &str) -> bool {
    RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m))
}

/// Pulls the `retry_after` seconds out of an error message, if present.
/// Values are capped at [`MAX_RETRY_AFTER_SECS`].
#[must_use]
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    RETRY_AFTER_PATTERN
        .captures(message)
        .and_then(|c| c.get(1))
        // Digits only, so a parse failure means the number overflowed.
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX))
        .map(clamp_retry_after)
}

fn clamp_retry_after(secs: u64) -> Duration {
    Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS))
}

// ============================================================================
// Fetch errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("malformed page: {0}")]
    Decode(String),
}

// ============================================================================
// Configuration and key errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid option: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("query key cannot be empty")]
    Empty,

    #[error("query key exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("query key contains control characters")]
    ControlCharacters,
}
