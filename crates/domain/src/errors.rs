//! Error types used throughout the engine
//!
//! Errors are layered the way collection runs fail:
//! - [`AdapterError`]: a source adapter could not produce events
//! - [`CalculationError`]: events were fetched but the indicator is undefined
//! - [`CollectionError`]: why a single (definition, indicator) run failed
//! - [`SinkError`]: an export sink could not accept a result
//! - [`DoraError`]: everything else (configuration, validation, storage)
//!
//! Every error maps to a stable [`ErrorCategory`] that is written to status
//! records, logs and exported metrics.

use std::fmt;
use std::time::Duration;

use dora_common::error::{ErrorClassification, ErrorSeverity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EventKind;

/// Stable error label used in status records and exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    RateLimit,
    TransientNetwork,
    PermanentConfig,
    InsufficientData,
    UnmatchedEvent,
    Cancelled,
    SinkDelivery,
    Validation,
    Config,
    Store,
    Internal,
}

impl ErrorCategory {
    /// Label value
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::PermanentConfig => "permanent_config",
            Self::InsufficientData => "insufficient_data",
            Self::UnmatchedEvent => "unmatched_event",
            Self::Cancelled => "cancelled",
            Self::SinkDelivery => "sink_delivery",
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Store => "store",
            Self::Internal => "internal",
        }
    }

    /// Policy-driven exclusions: the data was fetched but defines no value
    pub fn is_exclusion(self) -> bool {
        matches!(self, Self::InsufficientData | Self::UnmatchedEvent)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a source adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {message}")]
    RateLimit { message: String, retry_after: Option<Duration> },

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("permanent configuration error: {0}")]
    PermanentConfig(String),
}

impl AdapterError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit { message: message.into(), retry_after }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::PermanentConfig(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::Auth,
            Self::RateLimit { .. } => ErrorCategory::RateLimit,
            Self::TransientNetwork(_) => ErrorCategory::TransientNetwork,
            Self::PermanentConfig(_) => ErrorCategory::PermanentConfig,
        }
    }
}

impl ErrorClassification for AdapterError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit { .. } | Self::TransientNetwork(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RateLimit { .. } | Self::TransientNetwork(_) => ErrorSeverity::Warning,
            Self::Auth(_) | Self::PermanentConfig(_) => ErrorSeverity::Error,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Calculation outcome that is not a value
///
/// Both variants are policy-driven: they describe the data, not a fault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalculationError {
    #[error("insufficient data: {actual} {subject} in window, at least {required} required")]
    InsufficientData { subject: String, required: usize, actual: usize },

    #[error("unmatched {kind} event '{id}' excluded")]
    UnmatchedEvent { kind: EventKind, id: String },
}

impl CalculationError {
    pub fn insufficient(subject: impl Into<String>, required: usize, actual: usize) -> Self {
        Self::InsufficientData { subject: subject.into(), required, actual }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InsufficientData { .. } => ErrorCategory::InsufficientData,
            Self::UnmatchedEvent { .. } => ErrorCategory::UnmatchedEvent,
        }
    }
}

impl ErrorClassification for CalculationError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Info
    }
}

/// Why one (definition, indicator) collection run failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("source '{source_name}': {error}")]
    Adapter { source_name: String, error: AdapterError },

    #[error(transparent)]
    Calculation(#[from] CalculationError),

    #[error("collection run timed out after {0:?}")]
    Timeout(Duration),

    #[error("collection run cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CollectionError {
    pub fn adapter(source_name: impl Into<String>, error: AdapterError) -> Self {
        Self::Adapter { source_name: source_name.into(), error }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Adapter { error, .. } => error.category(),
            Self::Calculation(e) => e.category(),
            // a run that exceeds its deadline is reported as a network fault
            Self::Timeout(_) => ErrorCategory::TransientNetwork,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

impl ErrorClassification for CollectionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Adapter { error, .. } => error.is_retryable(),
            Self::Timeout(_) => true,
            Self::Calculation(_) | Self::Cancelled | Self::Internal(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Adapter { error, .. } => error.severity(),
            Self::Calculation(e) => e.severity(),
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Cancelled => ErrorSeverity::Info,
            Self::Internal(_) => ErrorSeverity::Critical,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Adapter { error, .. } => error.retry_after(),
            _ => None,
        }
    }
}

/// Failure delivering a result to an export sink
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("delivery to sink '{sink}' failed: {message}")]
    Delivery { sink: String, message: String, retryable: bool },

    #[error("sink '{sink}' timed out after {timeout:?}")]
    Timeout { sink: String, timeout: Duration },

    #[error("failed to encode result for sink '{sink}': {message}")]
    Encoding { sink: String, message: String },

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

impl SinkError {
    pub fn retryable(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery { sink: sink.into(), message: message.into(), retryable: true }
    }

    pub fn permanent(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery { sink: sink.into(), message: message.into(), retryable: false }
    }
}

impl ErrorClassification for SinkError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Delivery { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::Encoding { .. } | Self::Config(_) => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        if self.is_retryable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum DoraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DoraError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Adapter(e) => e.category(),
            Self::Calculation(e) => e.category(),
            Self::Collection(e) => e.category(),
            Self::Sink(_) => ErrorCategory::SinkDelivery,
            Self::Store(_) => ErrorCategory::Store,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, DoraError>;
