//! # Dispatcher
//!
//! Resolves the handlers for an envelope, runs them under the concurrency
//! policy and folds their outcomes into a [`DispatchResult`].
//!
//! ## Flow
//!
//! ```text
//! dispatch(envelope, cancel)
//!   ├─► cancelled already? ──yes──► Err(DispatchCancelledError), nothing runs
//!   ├─► registry.lookup(event_type)
//!   │     └─ empty ──► Ok(NoSubscribers)
//!   ├─► partition by IsolationMode
//!   │     ├─ Independent: spawn each, admission bounded by Semaphore(max_concurrency)
//!   │     └─ Sequential:  one chain, each exits before the next starts
//!   │        (both groups run at the same time)
//!   ├─► every invocation yields a HandlerOutcome (errors and panics captured)
//!   └─► aggregate ──► DispatchResult, outcomes in dispatch order
//! ```
//!
//! ## Rules
//! - A handler's failure never aborts a sibling.
//! - Each invocation gets a child [`CancellationToken`]. It is cancelled when
//!   the handler's deadline expires or the publisher cancels.
//! - Handlers are never aborted. A handler that outlives its deadline, or the
//!   grace period after cancellation, is reported as timed out and left to
//!   finish on its own.
//! - A sequential handler past its deadline still holds the chain until it
//!   exits, for at most `cancellation_grace` after its token fires.
//! - Sequential handlers not yet started when cancellation is observed are
//!   reported as cancelled.

use std::any::Any;
use std::future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::aggregator::aggregate;
use crate::config::BusConfig;
use crate::error::{BusError, DispatchCancelledError, HandlerFailure};
use crate::events::EventEnvelope;
use crate::handler;
use crate::metrics::DispatchMetrics;
use crate::outcome::{DispatchResult, HandlerOutcome};
use crate::registry::{HandlerDescriptor, HandlerRegistry, IsolationMode};
use crate::serialization::ProviderChain;

/// Runs published envelopes against the registry.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    providers: Arc<ProviderChain>,
    metrics: Arc<DispatchMetrics>,
    config: BusConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        providers: Arc<ProviderChain>,
        metrics: Arc<DispatchMetrics>,
        config: BusConfig,
    ) -> Self {
        Self {
            registry,
            providers,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Dispatch one envelope.
    ///
    /// # Errors
    ///
    /// `BusError::Cancelled` when `cancel` fired before dispatch started.
    /// Handler failures are not errors here; see [`DispatchResult::status`].
    pub async fn dispatch(
        &self,
        envelope: EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, BusError> {
        let span = info_span!(
            "publish",
            event_type = %envelope.event_type(),
            correlation_id = envelope.correlation_id().unwrap_or_default(),
        );
        self.dispatch_inner(envelope, cancel).instrument(span).await
    }

    async fn dispatch_inner(
        &self,
        envelope: EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, BusError> {
        let event_type = envelope.event_type().clone();

        if cancel.is_cancelled() {
            self.metrics.record_rejected();
            debug!("Publish cancelled before dispatch");
            return Err(DispatchCancelledError { event_type }.into());
        }

        if self.config.log_payloads {
            self.log_payload(&envelope);
        }

        let started = Instant::now();
        let handlers = self.registry.lookup(event_type.as_str());
        if handlers.is_empty() {
            debug!("No subscribers");
            let result = DispatchResult::no_subscribers(event_type);
            self.metrics.record_dispatch(&result, started.elapsed());
            return Ok(result);
        }

        let event = Arc::new(envelope);
        // Values above the semaphore's ceiling mean "no practical cap".
        let semaphore = Semaphore::new(self.config.max_concurrency.min(Semaphore::MAX_PERMITS));

        let (independent, sequential): (Vec<_>, Vec<_>) = handlers
            .iter()
            .enumerate()
            .partition(|(_, d)| d.isolation == IsolationMode::Independent);

        let independent_run = join_all(independent.into_iter().map(|(pos, desc)| {
            let (event, semaphore) = (&event, &semaphore);
            async move { (pos, self.run_independent(desc, event, cancel, semaphore).await) }
        }));

        let sequential_run = async {
            let mut outcomes = Vec::with_capacity(sequential.len());
            for (pos, desc) in &sequential {
                let outcome = if cancel.is_cancelled() {
                    not_started(desc)
                } else {
                    self.invoke(desc, &event, cancel, Settle::Wait).await
                };
                outcomes.push((*pos, outcome));
            }
            outcomes
        };

        let (mut outcomes, sequential) = tokio::join!(independent_run, sequential_run);
        outcomes.extend(sequential);
        outcomes.sort_by_key(|(pos, _)| *pos);
        let outcomes: Vec<HandlerOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

        for outcome in &outcomes {
            if let Some(failure) = outcome.failure() {
                warn!(
                    handler_id = %outcome.handler_id,
                    handler = %outcome.handler_name,
                    kind = %failure.kind(),
                    error = %failure.detail(),
                    "Handler failed"
                );
            }
        }

        let (status, error) = aggregate(&event_type, &outcomes);
        let result = DispatchResult {
            event_type,
            status,
            outcomes,
            error,
            cancelled: cancel.is_cancelled(),
        };

        debug!(
            handlers = result.outcomes.len(),
            status = ?result.status,
            cancelled = result.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch complete"
        );
        self.metrics.record_dispatch(&result, started.elapsed());
        Ok(result)
    }

    /// Wait for a concurrency slot, then invoke.
    async fn run_independent(
        &self,
        desc: &Arc<HandlerDescriptor>,
        event: &Arc<EventEnvelope>,
        cancel: &CancellationToken,
        semaphore: &Semaphore,
    ) -> HandlerOutcome {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.acquire() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return not_started(desc);
        };
        self.invoke(desc, event, cancel, Settle::Detach).await
    }

    /// Run one handler to completion, deadline, or abandonment.
    async fn invoke(
        &self,
        desc: &Arc<HandlerDescriptor>,
        event: &Arc<EventEnvelope>,
        cancel: &CancellationToken,
        settle: Settle,
    ) -> HandlerOutcome {
        let started = Instant::now();
        let child = cancel.child_token();
        let span = info_span!("handler", handler = desc.name(), handler_id = %desc.id);
        let mut task = tokio::spawn(
            handler::invoke(Arc::clone(&desc.handler), Arc::clone(event), child.clone())
                .instrument(span),
        );

        let limit = desc.timeout.or(self.config.handler_timeout);
        let deadline = async {
            match limit {
                Some(limit) => {
                    time::sleep(limit).await;
                    limit
                }
                None => future::pending().await,
            }
        };
        let grace = self.config.cancellation_grace;
        let abandoned = async {
            cancel.cancelled().await;
            time::sleep(grace).await;
        };

        let mut past_deadline = false;
        let result = tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(HandlerFailure::from(err)),
                Err(join_err) => Err(HandlerFailure::execution(join_failure(join_err))),
            },
            timeout = deadline => {
                child.cancel();
                past_deadline = true;
                Err(HandlerFailure::Timeout { timeout })
            }
            () = abandoned => {
                child.cancel();
                Err(HandlerFailure::Timeout { timeout: started.elapsed() })
            }
        };
        let elapsed = started.elapsed();

        if settle == Settle::Wait && past_deadline {
            self.wait_for_exit(desc, &mut task).await;
        }
        // Dropping the JoinHandle detaches a still-running handler.

        HandlerOutcome {
            handler_id: desc.id,
            handler_name: desc.name().to_string(),
            result,
            elapsed,
        }
    }

    /// Give a cancelled handler `cancellation_grace` to exit.
    async fn wait_for_exit<T>(&self, desc: &HandlerDescriptor, task: &mut JoinHandle<T>) {
        if time::timeout(self.config.cancellation_grace, task).await.is_err() {
            warn!(
                handler_id = %desc.id,
                handler = %desc.name(),
                "Handler ignored cancellation; detaching it"
            );
        }
    }

    fn log_payload(&self, envelope: &EventEnvelope) {
        match envelope
            .to_external(&self.providers)
            .and_then(|external| external.to_json())
        {
            Ok(json) => debug!(envelope = %json, "Publishing event"),
            Err(err) => warn!(
                error = %err,
                label = err.as_label(),
                "Envelope could not be rendered for logging"
            ),
        }
    }
}

/// What to do with a handler task that is still running once its outcome is
/// decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    /// Drop the handle; the task keeps running on its own.
    Detach,
    /// Hold the caller until the task exits, bounded by `cancellation_grace`.
    Wait,
}

fn not_started(desc: &HandlerDescriptor) -> HandlerOutcome {
    HandlerOutcome {
        handler_id: desc.id,
        handler_name: desc.name().to_string(),
        result: Err(HandlerFailure::Cancelled {
            reason: "dispatch cancelled before handler started".to_string(),
        }),
        elapsed: Duration::ZERO,
    }
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler task was aborted".to_string();
    }
    format!("handler panicked: {}", panic_message(err.into_panic()))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
