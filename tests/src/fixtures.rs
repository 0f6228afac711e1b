//! Reusable handlers for the integration scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use local_bus::{CancellationToken, EventEnvelope, EventHandler, HandlerError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

/// Counts invocations and keeps every payload it was handed.
#[derive(Debug, Default)]
pub struct CountingHandler {
    calls: AtomicUsize,
    payloads: Mutex<Vec<Value>>,
}

impl CountingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl EventHandler for CountingHandler {
    fn name(&self) -> &str {
        "counter"
    }

    async fn handle(
        &self,
        event: Arc<EventEnvelope>,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.payloads.lock().push(event.payload().clone());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails with an execution error.
#[derive(Debug)]
pub struct FailingHandler {
    pub message: &'static str,
}

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(
        &self,
        _event: Arc<EventEnvelope>,
        _cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::failed(self.message))
    }
}

/// Sleeps while watching its token; records when it started and finished.
#[derive(Debug)]
pub struct TimedHandler {
    name: &'static str,
    work: Duration,
    timeline: Arc<Timeline>,
}

impl TimedHandler {
    pub fn new(name: &'static str, work: Duration, timeline: &Arc<Timeline>) -> Arc<Self> {
        Arc::new(Self {
            name,
            work,
            timeline: Arc::clone(timeline),
        })
    }
}

#[async_trait]
impl EventHandler for TimedHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(
        &self,
        _event: Arc<EventEnvelope>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        self.timeline.record(self.name, Mark::Start);
        tokio::select! {
            _ = tokio::time::sleep(self.work) => {
                self.timeline.record(self.name, Mark::End);
                Ok(())
            }
            _ = cancel.cancelled() => {
                self.timeline.record(self.name, Mark::Cancelled);
                Err(HandlerError::Canceled)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Start,
    End,
    Cancelled,
}

/// Shared record of handler lifecycle marks.
#[derive(Debug, Default)]
pub struct Timeline {
    entries: Mutex<Vec<(&'static str, Mark, Instant)>>,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, name: &'static str, mark: Mark) {
        self.entries.lock().push((name, mark, Instant::now()));
    }

    pub fn at(&self, name: &str, mark: Mark) -> Option<Instant> {
        self.entries
            .lock()
            .iter()
            .find(|(n, m, _)| *n == name && *m == mark)
            .map(|(_, _, at)| *at)
    }

    /// Position of a mark in recording order.
    pub fn index_of(&self, name: &str, mark: Mark) -> Option<usize> {
        self.entries
            .lock()
            .iter()
            .position(|(n, m, _)| *n == name && *m == mark)
    }

    pub fn has(&self, name: &str, mark: Mark) -> bool {
        self.index_of(name, mark).is_some()
    }
}
