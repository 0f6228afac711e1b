//! # Local Bus - In-Process Event Bus
//!
//! Decouples producers from consumers inside one process: producers publish
//! named events, every handler subscribed to that name runs, and the caller
//! gets back one aggregated [`DispatchResult`].
//!
//! ## Flow
//!
//! ```text
//! ┌──────────┐  publish()   ┌────────────┐  lookup()  ┌──────────────┐
//! │ Producer │ ───────────► │ Dispatcher │ ─────────► │   Registry   │
//! └──────────┘              └────────────┘            └──────────────┘
//!       ▲                         │ spawn each handler
//!       │                         ▼
//!       │                   ┌────────────┐  outcomes  ┌──────────────┐
//!       └──DispatchResult── │ Aggregator │ ◄───────── │   Handlers   │
//!                           └────────────┘            └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Failure isolation:** one handler failing, timing out or panicking never
//!   stops its siblings. Failures are reported per handler.
//! - **No subscribers is success:** publishing to an unknown event type returns
//!   [`DispatchStatus::NoSubscribers`].
//! - **Non-blocking registration:** `subscribe`/`unsubscribe` swap an immutable
//!   snapshot; in-flight publishes keep the one they started with.
//! - **Sequential handlers** for an event type run in registration order, each
//!   finishing before the next starts.
//! - **Cooperative cancellation:** cancelled before dispatch, nothing runs;
//!   cancelled during dispatch, stragglers are reported as timed out.
//!
//! ## Example
//!
//! ```rust,ignore
//! use local_bus::{LocalEventBus, SubscribeOptions};
//! use serde_json::json;
//!
//! let bus = LocalEventBus::new();
//! bus.subscribe_fn("UserRegistered", "welcome-mail", SubscribeOptions::default(), |event, _cancel| async move {
//!     tracing::info!(payload = %event.payload(), "sending welcome mail");
//!     Ok(())
//! })?;
//!
//! let result = bus.publish("UserRegistered", json!({ "userId": "u1" }), None).await?;
//! assert!(result.is_success());
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod aggregator;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod metrics;
pub mod outcome;
pub mod registry;
pub mod serialization;

// Re-export main types
pub use aggregator::aggregate;
pub use bus::{EventPublisher, LocalEventBus};
pub use config::{BusConfig, BusConfigBuilder, DEFAULT_CANCELLATION_GRACE, DEFAULT_MAX_CONCURRENCY};
pub use dispatcher::Dispatcher;
pub use error::{
    BusError, ConfigError, DispatchCancelledError, EventDispatchError, FailedHandler,
    HandlerError, HandlerFailure, HandlerFailureKind, SerializationError, ValidationError,
};
pub use events::{EventEnvelope, EventMetadata, EventType, ExternalEnvelope, ExternalMetadata};
pub use handler::{EventHandler, HandlerFn, HandlerRef};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use outcome::{DispatchResult, DispatchStatus, HandlerOutcome};
pub use registry::{
    HandlerDescriptor, HandlerId, HandlerRegistry, HandlerSnapshot, IsolationMode,
    SubscribeOptions,
};
pub use serialization::{
    Encoding, JsonProvider, ProviderChain, ProviderScope, Representation, SerializationProvider,
};

// Handlers take a token; re-exported so callers need not depend on tokio-util.
pub use tokio_util::sync::CancellationToken;
