//! # Event Handlers
//!
//! A handler is any type implementing [`EventHandler`]. The dispatcher treats
//! `handle` as an opaque async operation and only waits for its result.
//!
//! Handlers receive a [`CancellationToken`] that fires when the publisher
//! cancels the dispatch or the handler's deadline expires. Long-running
//! handlers should watch it and return [`HandlerError::Canceled`].
//!
//! ## Example
//! ```rust,ignore
//! use local_bus::{EventEnvelope, EventHandler, HandlerError};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Mailer;
//!
//! #[async_trait::async_trait]
//! impl EventHandler for Mailer {
//!     fn name(&self) -> &str { "mailer" }
//!
//!     async fn handle(&self, event: Arc<EventEnvelope>, cancel: CancellationToken) -> Result<(), HandlerError> {
//!         let user: UserRegistered = event.payload_as()?;
//!         // send welcome mail...
//!         Ok(())
//!     }
//! }
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::events::EventEnvelope;

/// Shared handler handle.
pub type HandlerRef = Arc<dyn EventHandler>;

/// Reacts to events of the types it is subscribed to.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Human-readable name used in logs and outcomes.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle(
        &self,
        event: Arc<EventEnvelope>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Closure-backed handler.
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the handler and returns it as a [`HandlerRef`].
    pub fn arc<Fut>(name: impl Into<Cow<'static, str>>, f: F) -> HandlerRef
    where
        F: Fn(Arc<EventEnvelope>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(Arc<EventEnvelope>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        event: Arc<EventEnvelope>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        (self.f)(event, cancel).await
    }
}

/// Runs `handler` against a shared envelope as a `'static` future.
pub(crate) fn invoke(
    handler: HandlerRef,
    event: Arc<EventEnvelope>,
    cancel: CancellationToken,
) -> BoxFuture<'static, Result<(), HandlerError>> {
    Box::pin(async move { handler.handle(event, cancel).await })
}
