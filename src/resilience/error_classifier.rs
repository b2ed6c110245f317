//! # Error Classification
//!
//! Message-based error classification for calls to the generation service.
//!
//! ## Overview
//!
//! Errors coming back from the external service are heterogeneous (transport errors,
//! HTTP status lines, provider JSON bodies), so classification works on the error's
//! rendered message. Matching is case-insensitive substring matching against an
//! ordered rule table; the first rule that matches decides the category.
//!
//! ## Precedence
//!
//! ```text
//! network → timeout → rate_limit → server → validation → client → unknown
//! ```
//!
//! Validation precedes client so that `"400 Bad Request: Validation failed"` is a
//! validation error rather than a generic 4xx.
//!
//! ## Usage
//!
//! ```rust
//! use conduit_core::resilience::{ErrorCategory, ErrorClassifier};
//!
//! let details = ErrorClassifier::error_details("HTTP 503 Service Unavailable");
//! assert_eq!(details.category, ErrorCategory::Server);
//! assert!(details.is_retryable);
//! assert_eq!(details.status_code, Some(503));
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Primary error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity failure before a response was received
    Network,
    /// The request or its connection timed out
    Timeout,
    /// The service rejected the call because of quota (HTTP 429)
    RateLimit,
    /// Server-side failure (HTTP 5xx)
    Server,
    /// Request-side failure (HTTP 4xx other than 429)
    Client,
    /// The request payload was rejected as invalid
    Validation,
    /// Nothing matched
    Unknown,
}

impl ErrorCategory {
    /// Whether errors of this category are transient
    ///
    /// Unknown errors are not retried so permanent failures are not masked as transient.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::RateLimit
                | ErrorCategory::Server
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Server => "server",
            ErrorCategory::Client => "client",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub is_retryable: bool,
    pub status_code: Option<u16>,
    pub original_message: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the ordered classification table
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRule {
    pub category: ErrorCategory,
    pub patterns: &'static [&'static str],
}

impl ClassificationRule {
    /// `message` must already be lowercased
    pub fn matches(&self, message: &str) -> bool {
        self.patterns.iter().any(|pattern| message.contains(pattern))
    }
}

/// Classification rules in precedence order
pub const CLASSIFICATION_RULES: &[ClassificationRule] = &[
    ClassificationRule {
        category: ErrorCategory::Network,
        patterns: &[
            "econnrefused",
            "econnreset",
            "etimedout",
            "enotfound",
            "enetunreach",
            "network request failed",
            "network error",
            "fetch failed",
            "socket hang up",
            "connection refused",
            "connection reset",
        ],
    },
    ClassificationRule {
        category: ErrorCategory::Timeout,
        patterns: &["timeout", "timed out", "deadline exceeded"],
    },
    ClassificationRule {
        category: ErrorCategory::RateLimit,
        patterns: &["429", "rate limit", "too many requests", "quota exceeded"],
    },
    ClassificationRule {
        category: ErrorCategory::Server,
        patterns: &[
            "500",
            "502",
            "503",
            "504",
            "internal server error",
            "bad gateway",
            "service unavailable",
            "gateway timeout",
        ],
    },
    ClassificationRule {
        category: ErrorCategory::Validation,
        patterns: &[
            "validation",
            "invalid",
            "malformed",
            "missing required",
            "schema error",
        ],
    },
    ClassificationRule {
        category: ErrorCategory::Client,
        patterns: &[
            "400",
            "401",
            "403",
            "404",
            "405",
            "409",
            "410",
            "bad request",
            "unauthorized",
            "forbidden",
            "not found",
            "method not allowed",
            "conflict",
            "gone",
        ],
    },
];

fn status_code_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"\b(\d{3})\b", r"(?i)status[:\s]+(\d{3})", r"(?i)http[:\s]+(\d{3})"]
            .iter()
            .map(|pattern| Regex::new(pattern).expect("static status code pattern compiles"))
            .collect()
    })
}

/// Stateless classifier over error messages
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Categorize an error message using [`CLASSIFICATION_RULES`]
    pub fn categorize(message: &str) -> ErrorCategory {
        let message = message.to_lowercase();
        CLASSIFICATION_RULES
            .iter()
            .find(|rule| rule.matches(&message))
            .map(|rule| rule.category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    pub fn is_retryable(message: &str) -> bool {
        Self::categorize(message).is_retryable()
    }

    /// Best-effort HTTP status extraction; only values in `[100, 600)` are accepted
    pub fn extract_status_code(message: &str) -> Option<u16> {
        status_code_patterns().iter().find_map(|pattern| {
            let code = pattern
                .captures(message)
                .and_then(|captures| captures.get(1))
                .and_then(|m| m.as_str().parse::<u16>().ok())?;
            (100..600).contains(&code).then_some(code)
        })
    }

    pub fn error_details(message: &str) -> ErrorClassification {
        let category = Self::categorize(message);
        ErrorClassification {
            category,
            is_retryable: category.is_retryable(),
            status_code: Self::extract_status_code(message),
            original_message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Classify any error through its `Display` rendering
    pub fn classify_error<E: fmt::Display + ?Sized>(error: &E) -> ErrorClassification {
        Self::error_details(&error.to_string())
    }

    pub fn user_friendly_message(message: &str) -> String {
        match Self::categorize(message) {
            ErrorCategory::Network => {
                "Network connection error. Please check your internet connection and try again."
                    .to_string()
            }
            ErrorCategory::RateLimit => {
                "API rate limit exceeded. Please wait a moment and try again.".to_string()
            }
            ErrorCategory::Server => {
                "Server error occurred. The issue is temporary and will be retried automatically."
                    .to_string()
            }
            ErrorCategory::Client => "Request error. Please check your input and try again.".to_string(),
            ErrorCategory::Validation => {
                "Validation error. Please verify all required fields are filled correctly."
                    .to_string()
            }
            ErrorCategory::Timeout => {
                "Request timed out. The operation is taking longer than expected and will be retried."
                    .to_string()
            }
            ErrorCategory::Unknown => format!("An error occurred: {message}"),
        }
    }

    pub fn recommended_action(message: &str) -> &'static str {
        match Self::categorize(message) {
            ErrorCategory::Network => "Check network connection and retry",
            ErrorCategory::RateLimit => "Wait for rate limit reset and retry",
            ErrorCategory::Server => "Retry with exponential backoff",
            ErrorCategory::Client => "Fix request parameters (do not retry)",
            ErrorCategory::Validation => "Validate input data (do not retry)",
            ErrorCategory::Timeout => "Retry with increased timeout",
            ErrorCategory::Unknown => "Log error and investigate (do not retry)",
        }
    }
}
