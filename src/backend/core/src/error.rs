//! Error handling for Strand Core.
//!
//! This module provides:
//! - A stable, machine-readable error code taxonomy for the store
//! - Severity and retryability classification per code
//! - User-facing messages separated from internal detail
//! - Error chaining to the underlying infrastructure failure
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use strand_core::error::{StoreError, Result, ErrorContext};
//!
//! fn my_function() -> Result<()> {
//!     some_operation().context("Failed to read stream tail")?;
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::events::event::StreamKey;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for store operations.
///
/// These codes are stable and can be used by callers for programmatic
/// error handling (retry loops, dead-lettering, alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Concurrency errors (1000-1099)
    VersionConflict,
    FreezeBusy,
    GappedTail,

    // Resolution errors (1100-1199)
    ResolutionFailed,
    ResolutionExhausted,

    // Infrastructure errors (2000-2099)
    LogUnavailable,
    QueueUnavailable,

    // Serialization errors (2100-2199)
    SerializationError,

    // Configuration errors (5000-5099)
    ConfigurationError,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            // Concurrency errors
            Self::VersionConflict => 1000,
            Self::FreezeBusy => 1001,
            Self::GappedTail => 1002,

            // Resolution errors
            Self::ResolutionFailed => 1100,
            Self::ResolutionExhausted => 1101,

            // Infrastructure errors
            Self::LogUnavailable => 2000,
            Self::QueueUnavailable => 2001,

            // Serialization errors
            Self::SerializationError => 2100,

            // Configuration errors
            Self::ConfigurationError => 5000,

            // Internal errors
            Self::InternalError => 9000,
        }
    }

    /// Check if this error is retryable.
    ///
    /// A version conflict is retryable in the sense that the caller may
    /// reload the aggregate and re-drive the whole operation; a resolution
    /// failure is terminal because re-driving it would hit the same
    /// missing merge route.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict
                | Self::FreezeBusy
                | Self::LogUnavailable
                | Self::QueueUnavailable
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "concurrency",
            1100..=1199 => "resolution",
            2000..=2099 => "infrastructure",
            2100..=2199 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected contention (version races, busy freezes)
    Low,
    /// Operational issues (exhausted retries, lost writer data)
    Medium,
    /// System errors (infrastructure failures, bad config)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            // Low severity - expected contention under concurrency
            ErrorCode::VersionConflict | ErrorCode::FreezeBusy => Self::Low,

            // Medium severity - operational
            ErrorCode::ResolutionFailed | ErrorCode::ResolutionExhausted => Self::Medium,

            // High severity - system errors
            ErrorCode::GappedTail
            | ErrorCode::LogUnavailable
            | ErrorCode::QueueUnavailable
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError => Self::High,

            // Critical severity
            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Strand Core.
///
/// This error type supports:
/// - Structured error codes for programmatic handling
/// - User-friendly vs internal messages
/// - Chaining to the underlying infrastructure failure
/// - Metrics integration
#[derive(Error, Debug)]
pub struct StoreError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional context key-value pairs
    context: HashMap<String, serde_json::Value>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl StoreError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            context: HashMap::new(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal store error occurred",
            message,
        )
    }

    /// Create a version conflict error for a stream.
    ///
    /// Raised when a version-guarded append observes that another writer
    /// committed after the expected version.
    pub fn version_conflict(key: &StreamKey, expected: u64, actual: u64) -> Self {
        Self::new(
            ErrorCode::VersionConflict,
            format!(
                "Version conflict on {}: expected {}, log is at {}",
                key, expected, actual
            ),
        )
        .with_context("stream", key.to_string())
        .with_context("expected_version", expected)
        .with_context("actual_version", actual)
    }

    /// Create a freeze-unavailable error for a stream.
    pub fn freeze_busy(key: &StreamKey) -> Self {
        Self::new(
            ErrorCode::FreezeBusy,
            format!("Stream {} is frozen by another resolution", key),
        )
        .with_context("stream", key.to_string())
    }

    /// Create a resolution failure for an event that has no merge route.
    pub fn resolution_failed(key: &StreamKey, event_type: &str) -> Self {
        Self::new(
            ErrorCode::ResolutionFailed,
            format!(
                "Conflict resolution failed on {}: no merge route for event type `{}`",
                key, event_type
            ),
        )
        .with_context("stream", key.to_string())
        .with_context("event_type", event_type)
    }

    /// Create an exhausted-retries error for a stream that kept racing.
    pub fn resolution_exhausted(key: &StreamKey, attempts: u32) -> Self {
        Self::new(
            ErrorCode::ResolutionExhausted,
            format!(
                "Resolution for {} still racing after {} attempts",
                key, attempts
            ),
        )
        .with_context("stream", key.to_string())
        .with_context("attempts", attempts)
    }

    /// Create a gapped-tail error for a non-contiguous read.
    pub fn gapped_tail(key: &StreamKey, expected: u64, got: u64) -> Self {
        Self::with_internal(
            ErrorCode::GappedTail,
            format!("Log returned a non-contiguous tail for {}", key),
            format!("expected version {}, got {}", expected, got),
        )
        .with_context("stream", key.to_string())
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the context map.
    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                tracing::error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                tracing::error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                tracing::warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "strand_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.code.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| StoreError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| StoreError::new(code, e.to_string()).with_source(e))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process event payload",
            error.to_string(),
        )
        .with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{Bucket, StreamId};

    fn key() -> StreamKey {
        StreamKey::new(Bucket::new("default"), StreamId::new("order-1"))
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::VersionConflict.is_retryable());
        assert!(ErrorCode::FreezeBusy.is_retryable());
        assert!(ErrorCode::LogUnavailable.is_retryable());
        assert!(!ErrorCode::ResolutionFailed.is_retryable());
        assert!(!ErrorCode::GappedTail.is_retryable());
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::VersionConflict.category(), "concurrency");
        assert_eq!(ErrorCode::ResolutionFailed.category(), "resolution");
        assert_eq!(ErrorCode::LogUnavailable.category(), "infrastructure");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_version_conflict_context() {
        let error = StoreError::version_conflict(&key(), 5, 7);
        assert_eq!(error.code(), ErrorCode::VersionConflict);
        assert!(error.is_retryable());
        assert_eq!(
            error.context().get("expected_version"),
            Some(&serde_json::json!(5))
        );
        assert_eq!(
            error.context().get("actual_version"),
            Some(&serde_json::json!(7))
        );
    }

    #[test]
    fn test_resolution_failed_is_terminal() {
        let error = StoreError::resolution_failed(&key(), "ItemRenamed");
        assert_eq!(error.code(), ErrorCode::ResolutionFailed);
        assert!(!error.is_retryable());
        assert_eq!(error.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::VersionConflict),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::LogUnavailable),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_display() {
        let error = StoreError::with_internal(
            ErrorCode::LogUnavailable,
            "Event log is unreachable",
            "connection refused: localhost:1113",
        );

        let display = format!("{}", error);
        assert!(display.contains("LogUnavailable"));
        assert!(display.contains("Event log is unreachable"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_error_context_trait() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let error = result.context("Failed to reach the log").unwrap_err();
        assert_eq!(error.code(), ErrorCode::InternalError);
        assert!(error.internal_message().unwrap().contains("log"));
    }
}
