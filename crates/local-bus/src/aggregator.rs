//! Folds per-handler outcomes into an overall status and composite error.
//!
//! Pure: never fails, never retries.

use crate::error::{EventDispatchError, FailedHandler};
use crate::events::EventType;
use crate::outcome::{DispatchStatus, HandlerOutcome};

/// Classify a finished dispatch.
///
/// - no outcomes → `NoSubscribers`
/// - all `Ok` → `AllSucceeded`
/// - otherwise → `PartialFailure` plus an [`EventDispatchError`] listing every
///   failure in the order given
pub fn aggregate(
    event_type: &EventType,
    outcomes: &[HandlerOutcome],
) -> (DispatchStatus, Option<EventDispatchError>) {
    if outcomes.is_empty() {
        return (DispatchStatus::NoSubscribers, None);
    }

    let failures: Vec<FailedHandler> = outcomes
        .iter()
        .filter_map(|o| {
            o.failure().map(|failure| FailedHandler {
                handler_id: o.handler_id,
                handler_name: o.handler_name.clone(),
                failure: failure.clone(),
            })
        })
        .collect();

    if failures.is_empty() {
        return (DispatchStatus::AllSucceeded, None);
    }

    let error = EventDispatchError {
        event_type: event_type.clone(),
        total: outcomes.len(),
        failures,
    };
    (DispatchStatus::PartialFailure, Some(error))
}
