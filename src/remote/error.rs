//! Remote operation error types.
//!
//! Errors from the source-control host are categorized for retry decisions:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network timeouts)
//! - **Permanent** errors require human intervention (most 4xx, merge
//!   conflicts, missing PRs)
//!
//! The flow engine records both kinds in the action history; only transient
//! errors are retried automatically with backoff.

use std::fmt;
use thiserror::Error;

/// The kind of remote error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Transient error - safe to retry with backoff.
    Transient,

    /// Permanent error - recorded, retryable only via the action history.
    Permanent,
}

impl RemoteErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, RemoteErrorKind::Transient)
    }
}

/// A remote operation error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    pub message: String,

    /// The underlying transport error, if available.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "remote error (HTTP {}): {}", code, self.message),
            None => write!(f, "remote error: {}", self.message),
        }
    }
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error by status code and message patterns.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let message = err.to_string();
        let status_code = extract_status_code(&message);

        let kind = match status_code {
            Some(429) => RemoteErrorKind::Transient,
            Some(403) if is_rate_limit_message(&message) => RemoteErrorKind::Transient,
            Some(code) if (500..600).contains(&code) => RemoteErrorKind::Transient,
            Some(_) => RemoteErrorKind::Permanent,
            None => {
                if is_network_message(&message) {
                    RemoteErrorKind::Transient
                } else {
                    RemoteErrorKind::Permanent
                }
            }
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(Box::new(err)),
        }
    }
}

/// Extracts the HTTP status code from an error message, if present.
///
/// octocrab's `Error` type doesn't expose a stable status code accessor
/// across all variants, so this falls back to well-established message
/// patterns. Returning `None` is safe: it yields conservative categorization.
fn extract_status_code(err_str: &str) -> Option<u16> {
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    for code in [404u16, 409, 422, 403, 401, 429, 500, 502, 503] {
        if err_str.contains(&code.to_string()) {
            return Some(code);
        }
    }
    None
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("secondary rate")
}

fn is_network_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("dns")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_extraction() {
        assert_eq!(extract_status_code("GitHub error, status: 503, foo"), Some(503));
        assert_eq!(extract_status_code("404 not found"), Some(404));
        assert_eq!(extract_status_code("mystery failure"), None);
    }

    #[test]
    fn transient_errors_are_retriable() {
        assert!(RemoteError::transient("x").kind.is_retriable());
        assert!(!RemoteError::permanent("x").kind.is_retriable());
    }

    #[test]
    fn rate_limit_is_transient() {
        assert!(is_rate_limit_message("API rate limit exceeded for installation"));
        assert!(!is_rate_limit_message("resource not accessible"));
    }

    #[test]
    fn network_errors_are_transient() {
        assert!(is_network_message("connection reset by peer"));
        assert!(is_network_message("request timed out"));
        assert!(!is_network_message("validation failed"));
    }
}
