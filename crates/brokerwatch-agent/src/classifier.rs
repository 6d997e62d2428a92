//! Broker Error Classification
//!
//! Maps a [`BrokerError`] to a small category set and a log-safe message.
//! Workers use the category to pick a log level and a metric label; nothing
//! here decides whether to retry (only the consecutive-error ceiling stops a
//! worker).
//!
//! Typed variants map directly. Free-form errors are matched against phrases
//! brokers commonly put in their messages.

use serde::Serialize;

use crate::broker::BrokerError;

/// Cap applied to messages when the caller has no preference.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    LeaderUnavailable,
    Timeout,
    Disconnect,
    AuthFailure,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::LeaderUnavailable => "leader_unavailable",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Disconnect => "disconnect",
            ErrorCategory::AuthFailure => "auth_failure",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Auth failures are logged at error level; everything else at warn.
    pub fn is_auth(&self) -> bool {
        matches!(self, ErrorCategory::AuthFailure)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    /// Single line, at most `max_len` characters
    pub message: String,
}

const AUTH_PHRASES: &[&str] = &[
    "sasl",
    "authentication",
    "authorization",
    "not authorized",
    "unauthorized",
    "access denied",
    "ssl handshake",
];

const LEADER_PHRASES: &[&str] = &[
    "not leader",
    "leader not available",
    "leader_not_available",
    "no leader",
    "leadernotavailable",
    "notleaderforpartition",
];

const TIMEOUT_PHRASES: &[&str] = &["timed out", "timeout", "deadline exceeded"];

const DISCONNECT_PHRASES: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "disconnect",
    "broken pipe",
    "network exception",
    "unexpected eof",
    "no route to host",
];

/// Classify a broker failure.
pub fn classify(error: &BrokerError, max_len: usize) -> ClassifiedError {
    let category = match error {
        BrokerError::LeaderNotAvailable { .. } | BrokerError::NotLeaderForPartition { .. } => {
            ErrorCategory::LeaderUnavailable
        }
        BrokerError::Timeout(_) => ErrorCategory::Timeout,
        BrokerError::Disconnected(_) => ErrorCategory::Disconnect,
        BrokerError::Authentication(_) | BrokerError::Authorization(_) => {
            ErrorCategory::AuthFailure
        }
        BrokerError::Protocol(text) | BrokerError::Other(text) => category_from_text(text),
    };

    ClassifiedError {
        category,
        message: safe_message(&error.to_string(), max_len),
    }
}

fn category_from_text(text: &str) -> ErrorCategory {
    let lower = text.to_lowercase();
    let mentions = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    // Auth first: "sasl handshake timed out" is a credentials problem.
    if mentions(AUTH_PHRASES) {
        ErrorCategory::AuthFailure
    } else if mentions(LEADER_PHRASES) {
        ErrorCategory::LeaderUnavailable
    } else if mentions(TIMEOUT_PHRASES) {
        ErrorCategory::Timeout
    } else if mentions(DISCONNECT_PHRASES) {
        ErrorCategory::Disconnect
    } else {
        ErrorCategory::Unknown
    }
}

/// Collapse whitespace and control characters onto one line and cap the length.
pub fn safe_message(raw: &str, max_len: usize) -> String {
    let single_line = raw
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if single_line.chars().count() <= max_len {
        return single_line;
    }

    if max_len <= 3 {
        return single_line.chars().take(max_len).collect();
    }

    let mut truncated: String = single_line.chars().take(max_len - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_typed_variants() {
        let cases = [
            (
                BrokerError::LeaderNotAvailable {
                    topic: "orders".to_string(),
                },
                ErrorCategory::LeaderUnavailable,
            ),
            (
                BrokerError::NotLeaderForPartition { partition: 3 },
                ErrorCategory::LeaderUnavailable,
            ),
            (
                BrokerError::Timeout(Duration::from_secs(1)),
                ErrorCategory::Timeout,
            ),
            (
                BrokerError::Disconnected("peer gone".to_string()),
                ErrorCategory::Disconnect,
            ),
            (
                BrokerError::Authentication("bad password".to_string()),
                ErrorCategory::AuthFailure,
            ),
            (
                BrokerError::Authorization("topic acl".to_string()),
                ErrorCategory::AuthFailure,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(classify(&error, 200).category, expected, "{:?}", error);
        }
    }

    #[test]
    fn test_free_text_phrases() {
        let category = |text: &str| classify(&BrokerError::Other(text.to_string()), 200).category;

        assert_eq!(
            category("This server is Not Leader for that topic-partition"),
            ErrorCategory::LeaderUnavailable
        );
        assert_eq!(category("Fetch request timed out"), ErrorCategory::Timeout);
        assert_eq!(
            category("Connection refused (os error 111)"),
            ErrorCategory::Disconnect
        );
        assert_eq!(
            category("SASL handshake timed out"),
            ErrorCategory::AuthFailure
        );
        assert_eq!(category("record batch CRC mismatch"), ErrorCategory::Unknown);
        assert_eq!(
            classify(&BrokerError::Protocol("broken pipe".to_string()), 200).category,
            ErrorCategory::Disconnect
        );
    }

    #[test]
    fn test_message_is_single_line_and_capped() {
        let long = format!("line one\nline two\t{}", "x".repeat(500));
        let classified = classify(&BrokerError::Other(long), 50);

        assert!(!classified.message.contains('\n'));
        assert!(!classified.message.contains('\t'));
        assert_eq!(classified.message.chars().count(), 50);
        assert!(classified.message.starts_with("line one line two"));
        assert!(classified.message.ends_with("..."));
    }

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(safe_message("all good", 200), "all good");
        assert_eq!(safe_message("abcdef", 2), "ab");
    }

    #[test]
    fn test_only_auth_is_auth() {
        assert!(ErrorCategory::AuthFailure.is_auth());
        assert!(!ErrorCategory::Timeout.is_auth());
        assert!(!ErrorCategory::Unknown.is_auth());
    }
}
