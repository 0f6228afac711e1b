//! # Local Event Bus
//!
//! The public surface: subscribe, unsubscribe, publish.
//!
//! `LocalEventBus` is cheap to share (`Arc<LocalEventBus>`) and safe to use
//! from any number of producer tasks at once. Registration swaps an immutable
//! snapshot, so it never waits on an in-flight publish.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::BusConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{BusError, ConfigError, HandlerError, ValidationError};
use crate::events::{EventEnvelope, EventMetadata};
use crate::handler::{HandlerFn, HandlerRef};
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::outcome::DispatchResult;
use crate::registry::{HandlerId, HandlerRegistry, SubscribeOptions};
use crate::serialization::{ProviderChain, SerializationProvider};

/// Publishing side of the bus.
///
/// Producers depend on this trait rather than on [`LocalEventBus`], so tests
/// and wiring layers can substitute their own implementation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an already-built envelope.
    async fn publish_envelope(
        &self,
        envelope: EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, BusError>;

    /// Total publishes that reached dispatch.
    fn events_published(&self) -> u64;
}

/// In-process event bus.
pub struct LocalEventBus {
    registry: Arc<HandlerRegistry>,
    providers: Arc<ProviderChain>,
    metrics: Arc<DispatchMetrics>,
    dispatcher: Dispatcher,
}

impl LocalEventBus {
    /// Bus with [`BusConfig::default`] and the default JSON provider.
    #[must_use]
    pub fn new() -> Self {
        Self::build(BusConfig::default())
    }

    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found by [`BusConfig::validate`].
    pub fn with_config(config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BusConfig) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let providers = Arc::new(ProviderChain::with_defaults());
        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&providers),
            Arc::clone(&metrics),
            config,
        );
        Self {
            registry,
            providers,
            metrics,
            dispatcher,
        }
    }

    pub fn config(&self) -> &BusConfig {
        self.dispatcher.config()
    }

    /// Register `handler` for `event_type`.
    ///
    /// # Errors
    ///
    /// `ValidationError::EmptyEventType` for a blank event type.
    pub fn subscribe(
        &self,
        event_type: impl AsRef<str>,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<HandlerId, ValidationError> {
        self.registry.register(event_type, handler, options)
    }

    /// Register a closure as a handler.
    pub fn subscribe_fn<F, Fut>(
        &self,
        event_type: impl AsRef<str>,
        name: impl Into<Cow<'static, str>>,
        options: SubscribeOptions,
        f: F,
    ) -> Result<HandlerId, ValidationError>
    where
        F: Fn(Arc<EventEnvelope>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(event_type, HandlerFn::arc(name, f), options)
    }

    /// Remove a subscription. Unknown ids are ignored.
    ///
    /// Publishes already in flight keep the snapshot they started with.
    pub fn unsubscribe(&self, id: HandlerId) {
        if !self.registry.unregister(id) {
            debug!(handler_id = %id, "Unsubscribe for unknown handler ignored");
        }
    }

    /// Publish `payload` as `event_type`.
    ///
    /// # Errors
    ///
    /// `BusError::Validation` for a blank event type or malformed metadata.
    ///
    /// Handler failures are reported in the returned [`DispatchResult`].
    pub async fn publish(
        &self,
        event_type: &str,
        payload: Value,
        metadata: Option<EventMetadata>,
    ) -> Result<DispatchResult, BusError> {
        self.publish_with_cancel(event_type, payload, metadata, &CancellationToken::new())
            .await
    }

    /// Publish with an external cancellation signal.
    ///
    /// Cancelled before dispatch starts: `Err(BusError::Cancelled)` and no
    /// handler runs. Cancelled during dispatch: the result has
    /// `cancelled == true` and per-handler outcomes for everything.
    pub async fn publish_with_cancel(
        &self,
        event_type: &str,
        payload: Value,
        metadata: Option<EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, BusError> {
        let envelope = EventEnvelope::new(event_type, payload, metadata.unwrap_or_default())
            .map_err(|err| {
                self.metrics.record_rejected();
                debug!(error = %err, label = err.as_label(), "Publish rejected");
                err
            })?;
        self.dispatcher.dispatch(envelope, cancel).await
    }

    /// Publish any serializable payload.
    ///
    /// # Errors
    ///
    /// `BusError::Serialization` when `payload` does not convert to a
    /// structured value, plus everything [`publish`](Self::publish) returns.
    pub async fn publish_typed<T: Serialize>(
        &self,
        event_type: &str,
        payload: &T,
        metadata: Option<EventMetadata>,
    ) -> Result<DispatchResult, BusError> {
        self.publish_typed_with_cancel(event_type, payload, metadata, &CancellationToken::new())
            .await
    }

    /// [`publish_typed`](Self::publish_typed) with an external cancellation
    /// signal, honored as in [`publish_with_cancel`](Self::publish_with_cancel).
    pub async fn publish_typed_with_cancel<T: Serialize>(
        &self,
        event_type: &str,
        payload: &T,
        metadata: Option<EventMetadata>,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, BusError> {
        let envelope = EventEnvelope::from_payload(
            event_type,
            payload,
            metadata.unwrap_or_default(),
        )
        .map_err(|err| {
            self.metrics.record_rejected();
            err
        })?;
        self.dispatcher.dispatch(envelope, cancel).await
    }

    /// Append a provider to the serialization chain.
    pub fn register_serialization_provider(&self, provider: Arc<dyn SerializationProvider>) {
        self.providers.register(provider);
    }

    pub fn providers(&self) -> &ProviderChain {
        &self.providers
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for LocalEventBus {
    async fn publish_envelope(
        &self,
        envelope: EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<DispatchResult, BusError> {
        self.dispatcher.dispatch(envelope, cancel).await
    }

    fn events_published(&self) -> u64 {
        self.metrics.snapshot().events_published
    }
}
