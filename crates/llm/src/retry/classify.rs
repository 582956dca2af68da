//! Transient-failure classification for Gemini calls
//!
//! Structured data wins: caller-context errors, HTTP status codes and
//! reqwest's timeout/connect flags are checked first. Only errors that carry
//! nothing but a message fall through to the substring table below, which is
//! a heuristic and will misclassify messages that happen to contain one of
//! the phrases.

use super::RetryableError;
use crate::error::RelayError;

/// Phrases that mark an otherwise unstructured failure as transient.
pub const TRANSIENT_MESSAGE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "unavailable",
    "connection reset",
    "eof",
    "resource exhausted",
    "resource_exhausted",
    "temporarily",
    "deadline exceeded",
];

pub fn is_retryable(error: &RelayError) -> bool {
    match error {
        RelayError::Operation { source, .. } => is_retryable(source),
        // The caller gave up; another attempt is wasted work.
        RelayError::Context(_) => false,
        RelayError::Validation { .. }
        | RelayError::NotFound { .. }
        | RelayError::Configuration(_) => false,
        RelayError::Api { status, .. } => is_retryable_status(*status),
        RelayError::Transport {
            message,
            timeout,
            connect,
        } => *timeout || *connect || is_transient_message(message),
        RelayError::Decode(message) => is_transient_message(message),
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

pub fn is_transient_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_MESSAGE_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

pub fn error_type(error: &RelayError) -> &'static str {
    match error {
        RelayError::Operation { source, .. } => error_type(source),
        RelayError::Validation { .. } => "validation",
        RelayError::NotFound { .. } => "not_found",
        RelayError::Configuration(_) => "configuration",
        RelayError::Context(crate::context::ContextError::Cancelled) => "cancelled",
        RelayError::Context(crate::context::ContextError::DeadlineExceeded) => "deadline_exceeded",
        RelayError::Api { status, .. } => match status {
            408 => "timeout",
            429 => "rate_limit",
            500..=599 => "server_error",
            400 => "bad_request",
            401 => "unauthorized",
            403 => "forbidden",
            404 => "not_found",
            _ => "api_error",
        },
        RelayError::Transport { timeout: true, .. } => "timeout",
        RelayError::Transport { connect: true, .. } => "network",
        RelayError::Transport { .. } => "transport",
        RelayError::Decode(_) => "decode",
    }
}

impl RetryableError for RelayError {
    fn is_retryable(&self) -> bool {
        is_retryable(self)
    }

    fn error_type(&self) -> &'static str {
        error_type(self)
    }
}
