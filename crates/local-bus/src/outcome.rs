//! Per-handler outcomes and the per-publish [`DispatchResult`].

use std::time::Duration;

use crate::error::{EventDispatchError, HandlerFailure, HandlerFailureKind};
use crate::events::EventType;
use crate::registry::HandlerId;

/// Overall verdict of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchStatus {
    AllSucceeded,
    /// At least one handler failed. Inspect the per-handler outcomes.
    PartialFailure,
    /// No handler was registered. This is a success.
    NoSubscribers,
}

impl DispatchStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::PartialFailure)
    }
}

/// What happened to one handler during one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub handler_id: HandlerId,
    pub handler_name: String,
    pub result: Result<(), HandlerFailure>,
    /// Time from start of the invocation to completion (or to giving up).
    /// Zero when the handler never started.
    pub elapsed: Duration,
}

impl HandlerOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&HandlerFailure> {
        self.result.as_ref().err()
    }

    pub fn failure_kind(&self) -> Option<HandlerFailureKind> {
        self.failure().map(HandlerFailure::kind)
    }
}

/// Result of one publish, owned by the caller.
///
/// `outcomes` is in dispatch order (priority, then registration), whatever
/// order handlers actually finished in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub event_type: EventType,
    pub status: DispatchStatus,
    pub outcomes: Vec<HandlerOutcome>,
    /// Composite error, present iff `status == PartialFailure`.
    pub error: Option<EventDispatchError>,
    /// The publish was cancelled after dispatch had started.
    pub cancelled: bool,
}

impl DispatchResult {
    pub(crate) fn no_subscribers(event_type: EventType) -> Self {
        Self {
            event_type,
            status: DispatchStatus::NoSubscribers,
            outcomes: Vec::new(),
            error: None,
            cancelled: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn outcome(&self, id: HandlerId) -> Option<&HandlerOutcome> {
        self.outcomes.iter().find(|o| o.handler_id == id)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &HandlerOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &HandlerOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Turn a partial failure into an `Err`, for callers that want `?`.
    pub fn into_result(self) -> Result<Self, EventDispatchError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
