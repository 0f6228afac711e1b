//! # Handler Registry
//!
//! Holds, per event type, the ordered list of handler subscriptions.
//!
//! ## Snapshot model
//!
//! ```text
//!  readers ──► read lock ──► clone Arc<Snapshot> ──► release
//!
//!  writer  ──► writer mutex ──► copy snapshot ──► mutate copy
//!                                                  │
//!                              write lock ◄────────┘ (pointer swap only)
//! ```
//!
//! - Readers never see a half-applied registration: each mutation publishes a
//!   whole new snapshot.
//! - Writers serialize among themselves on a separate mutex and only take the
//!   read/write lock for the final swap, so lookups are never held up by the
//!   copy.
//! - Buckets are `Arc<[..]>`, so copying the snapshot clones pointers, not
//!   descriptors.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::events::EventType;
use crate::handler::HandlerRef;

/// Unique id of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(Uuid);

impl HandlerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a handler is scheduled relative to its siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationMode {
    /// Runs concurrently with other independent handlers.
    #[default]
    Independent,
    /// Runs in registration order, each one finishing before the next
    /// sequential handler starts. Does not hold up independent handlers.
    Sequential,
}

/// Per-subscription options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Lower runs (and reports) first. Ties keep registration order.
    pub priority: Option<i32>,
    pub isolation: IsolationMode,
    /// Per-call deadline; overrides the bus default.
    pub timeout: Option<Duration>,
    /// Overrides `EventHandler::name` in logs and outcomes.
    pub name: Option<String>,
}

impl SubscribeOptions {
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            isolation: IsolationMode::Sequential,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One registration, owned by the registry until unsubscribed.
pub struct HandlerDescriptor {
    pub id: HandlerId,
    pub event_type: EventType,
    pub handler: HandlerRef,
    /// Registration sequence number, strictly increasing per registry.
    pub order: u64,
    pub priority: i32,
    pub isolation: IsolationMode,
    pub timeout: Option<Duration>,
    name: String,
}

impl HandlerDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn sort_key(&self) -> (i32, u64) {
        (self.priority, self.order)
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("name", &self.name)
            .field("order", &self.order)
            .field("priority", &self.priority)
            .field("isolation", &self.isolation)
            .field("timeout", &self.timeout)
            .finish()
    }
}

type Bucket = Arc<[Arc<HandlerDescriptor>]>;

#[derive(Clone, Default)]
struct Snapshot {
    buckets: HashMap<EventType, Bucket>,
    index: HashMap<HandlerId, EventType>,
}

/// Immutable view of one event type's handlers at lookup time.
///
/// Iterating it any number of times yields the same descriptors, whatever
/// happens to the registry in between.
#[derive(Clone, Default)]
pub struct HandlerSnapshot {
    handlers: Option<Bucket>,
}

impl HandlerSnapshot {
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<HandlerDescriptor>> {
        self.as_slice().iter()
    }

    pub fn as_slice(&self) -> &[Arc<HandlerDescriptor>] {
        self.handlers.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn ids(&self) -> Vec<HandlerId> {
        self.iter().map(|d| d.id).collect()
    }
}

impl<'a> IntoIterator for &'a HandlerSnapshot {
    type Item = &'a Arc<HandlerDescriptor>;
    type IntoIter = std::slice::Iter<'a, Arc<HandlerDescriptor>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for HandlerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Event type → ordered handler subscriptions.
pub struct HandlerRegistry {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    next_order: AtomicU64,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
            next_order: AtomicU64::new(1),
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Apply `mutate` to a copy of the current snapshot and publish it.
    fn update<R>(&self, mutate: impl FnOnce(&mut Snapshot) -> R) -> R {
        let _guard = self.writer.lock();
        let mut next = Snapshot::clone(&self.snapshot());
        let out = mutate(&mut next);
        *self.current.write() = Arc::new(next);
        out
    }

    /// Register `handler` for `event_type`.
    ///
    /// Registering the same handler object twice is allowed; each call gets
    /// its own id and is invoked separately.
    ///
    /// # Errors
    ///
    /// `ValidationError::EmptyEventType` for a blank event type.
    pub fn register(
        &self,
        event_type: impl AsRef<str>,
        handler: HandlerRef,
        options: SubscribeOptions,
    ) -> Result<HandlerId, ValidationError> {
        let event_type = EventType::parse(event_type)?;
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| handler.name().to_string());

        let descriptor = Arc::new(HandlerDescriptor {
            id: HandlerId::new(),
            event_type: event_type.clone(),
            handler,
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
            priority: options.priority.unwrap_or(0),
            isolation: options.isolation,
            timeout: options.timeout,
            name,
        });
        let id = descriptor.id;

        self.update(|snap| {
            let mut bucket: Vec<_> = snap
                .buckets
                .get(&event_type)
                .map(|b| b.to_vec())
                .unwrap_or_default();
            bucket.push(Arc::clone(&descriptor));
            bucket.sort_by_key(|d| d.sort_key());
            snap.buckets.insert(event_type.clone(), bucket.into());
            snap.index.insert(id, event_type.clone());
        });

        debug!(
            handler_id = %id,
            handler = descriptor.name(),
            event_type = %event_type,
            order = descriptor.order,
            isolation = ?descriptor.isolation,
            "Handler registered"
        );
        Ok(id)
    }

    /// Remove a subscription. Returns `false` when the id is unknown.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let removed = self.update(|snap| {
            let Some(event_type) = snap.index.remove(&id) else {
                return None;
            };
            let remaining: Vec<_> = snap
                .buckets
                .get(&event_type)
                .map(|b| b.iter().filter(|d| d.id != id).cloned().collect())
                .unwrap_or_default();
            if remaining.is_empty() {
                snap.buckets.remove(&event_type);
            } else {
                snap.buckets.insert(event_type.clone(), remaining.into());
            }
            Some(event_type)
        });

        match removed {
            Some(event_type) => {
                debug!(handler_id = %id, event_type = %event_type, "Handler unregistered");
                true
            }
            None => false,
        }
    }

    /// Handlers for `event_type`, in dispatch order. Surrounding whitespace is
    /// ignored, as in [`register`](Self::register).
    pub fn lookup(&self, event_type: &str) -> HandlerSnapshot {
        HandlerSnapshot {
            handlers: self.snapshot().buckets.get(event_type.trim()).cloned(),
        }
    }

    /// Event type a handler is registered under.
    pub fn event_type_of(&self, id: HandlerId) -> Option<EventType> {
        self.snapshot().index.get(&id).cloned()
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.snapshot().index.contains_key(&id)
    }

    /// Total number of live subscriptions.
    pub fn len(&self) -> usize {
        self.snapshot().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Event types with at least one subscription, sorted.
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<_> = self.snapshot().buckets.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("subscriptions", &self.len())
            .field("event_types", &self.event_types())
            .finish()
    }
}
