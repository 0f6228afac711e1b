//! # Error Types
//!
//! Every failure the bus can report, from a rejected publish request down to a
//! single handler that faulted.
//!
//! ## Propagation
//!
//! - [`ValidationError`] and [`DispatchCancelledError`] abort the whole publish
//!   (surfaced as [`BusError`]).
//! - [`HandlerFailure`] is recorded per handler and never escapes into sibling
//!   invocations.
//! - [`EventDispatchError`] is the composite built by the aggregator when one or
//!   more handlers failed.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::events::EventType;
use crate::registry::HandlerId;

/// A malformed publish or subscribe request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Event type name was empty or whitespace only.
    #[error("event type must not be empty")]
    EmptyEventType,

    /// Correlation id was supplied but empty.
    #[error("correlation id must not be empty when present")]
    EmptyCorrelationId,

    /// Header name was empty.
    #[error("metadata header names must not be empty")]
    EmptyHeaderName,
}

impl ValidationError {
    /// Returns a short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::EmptyEventType => "validation_empty_event_type",
            Self::EmptyCorrelationId => "validation_empty_correlation_id",
            Self::EmptyHeaderName => "validation_empty_header_name",
        }
    }
}

/// Failures of the serialization step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// No registered provider accepts this event type.
    #[error("no serialization provider supports event type '{event_type}'")]
    UnsupportedType { event_type: String },

    /// Input did not match the expected shape.
    #[error("malformed data for '{target}': {reason}")]
    MalformedData { target: String, reason: String },
}

impl SerializationError {
    pub(crate) fn malformed(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::MalformedData {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::UnsupportedType { .. } => "serialization_unsupported_type",
            Self::MalformedData { .. } => "serialization_malformed_data",
        }
    }
}

/// Error returned by a handler's own code.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler rejected or failed to process the event.
    #[error("{0}")]
    Failed(String),

    /// Handler observed cancellation and stopped early.
    #[error("handler observed cancellation")]
    Canceled,

    /// Any other error raised inside the handler.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<SerializationError> for HandlerError {
    fn from(err: SerializationError) -> Self {
        Self::Internal(err.into())
    }
}

/// Classification of a single handler's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerFailureKind {
    /// Handler code itself faulted (returned an error or panicked).
    Execution,
    /// Handler did not finish before its deadline or before the caller gave up.
    Timeout,
    /// Dispatch was cancelled before this handler could start, or the handler
    /// stopped early after observing cancellation.
    Cancelled,
}

impl HandlerFailureKind {
    /// Returns a short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Execution => "handler_execution_error",
            Self::Timeout => "handler_timeout_error",
            Self::Cancelled => "dispatch_cancelled_error",
        }
    }
}

impl fmt::Display for HandlerFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A classified failure of one handler invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerFailure {
    #[error("handler execution failed: {cause}")]
    Execution { cause: String },

    #[error("handler timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("handler cancelled: {reason}")]
    Cancelled { reason: String },
}

impl HandlerFailure {
    pub fn execution(cause: impl fmt::Display) -> Self {
        Self::Execution {
            cause: cause.to_string(),
        }
    }

    pub fn kind(&self) -> HandlerFailureKind {
        match self {
            Self::Execution { .. } => HandlerFailureKind::Execution,
            Self::Timeout { .. } => HandlerFailureKind::Timeout,
            Self::Cancelled { .. } => HandlerFailureKind::Cancelled,
        }
    }

    /// Human-readable cause without the kind prefix.
    pub fn detail(&self) -> String {
        match self {
            Self::Execution { cause } => cause.clone(),
            Self::Timeout { timeout } => format!("no completion within {timeout:?}"),
            Self::Cancelled { reason } => reason.clone(),
        }
    }
}

impl From<HandlerError> for HandlerFailure {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Canceled => Self::Cancelled {
                reason: "handler stopped after observing cancellation".to_string(),
            },
            // `{:#}` keeps the anyhow context chain on one line.
            HandlerError::Internal(e) => Self::execution(format_args!("{e:#}")),
            other => Self::execution(other),
        }
    }
}

/// One failed handler inside an [`EventDispatchError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedHandler {
    pub handler_id: HandlerId,
    pub handler_name: String,
    pub failure: HandlerFailure,
}

impl FailedHandler {
    pub fn kind(&self) -> HandlerFailureKind {
        self.failure.kind()
    }
}

/// Composite error for a publish in which at least one handler failed.
///
/// Carries every failure, in registration order, so nothing is lost by
/// aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{} of {total} handler(s) failed for event '{event_type}': {}",
    .failures.len(),
    summarize(.failures)
)]
pub struct EventDispatchError {
    pub event_type: EventType,
    pub total: usize,
    pub failures: Vec<FailedHandler>,
}

impl EventDispatchError {
    /// Failures of one kind only.
    pub fn failures_of(&self, kind: HandlerFailureKind) -> impl Iterator<Item = &FailedHandler> {
        self.failures.iter().filter(move |f| f.kind() == kind)
    }

    pub fn as_label(&self) -> &'static str {
        "event_dispatch_error"
    }
}

fn summarize(failures: &[FailedHandler]) -> String {
    failures
        .iter()
        .map(|f| format!("[{} {}: {}]", f.handler_name, f.kind(), f.failure.detail()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cancellation observed before any handler was started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("dispatch of '{event_type}' cancelled before any handler started")]
pub struct DispatchCancelledError {
    pub event_type: EventType,
}

/// Rejected configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("handler_timeout must be greater than zero when set")]
    ZeroHandlerTimeout,
}

/// Errors that abort a whole publish call.
///
/// Handler failures are never reported here; they live in the
/// [`DispatchResult`](crate::DispatchResult).
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cancelled(#[from] DispatchCancelledError),

    /// Payload could not be converted before dispatch.
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl BusError {
    /// Returns a short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.as_label(),
            Self::Cancelled(_) => "dispatch_cancelled",
            Self::Serialization(e) => e.as_label(),
        }
    }
}
