//! # Serialization Providers
//!
//! Converts payloads to and from a transport-neutral [`Representation`].
//! Only used when an envelope crosses a representation boundary (payload
//! logging, caller-owned persistence hooks); handlers always get the
//! in-memory value.
//!
//! Providers are composed into a [`ProviderChain`]. Lookup is by event type:
//! registered providers are consulted in registration order, then the
//! built-in fallback. First match wins.
//!
//! ```text
//! serialize(event_type, value)
//!     │
//!     ├──► provider 1 supports? ──no──► provider 2 supports? ──no──► fallback
//!     │          │ yes                        │ yes                     │
//!     ▼          ▼                            ▼                         ▼
//!             serialize                    serialize                 serialize
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::SerializationError;
use crate::events::EventType;

/// Provider output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    Text(String),
    Binary(Vec<u8>),
}

impl Representation {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Which [`Representation`] variant a provider produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Binary,
}

/// Stateless payload codec.
///
/// Implementations must satisfy `deserialize(serialize(x)) == x` for every
/// value they accept.
pub trait SerializationProvider: Send + Sync {
    /// Stable provider name, used in logs.
    fn name(&self) -> &str;

    fn encoding(&self) -> Encoding;

    /// Whether this provider handles payloads of `event_type`.
    fn supports(&self, event_type: &EventType) -> bool;

    fn serialize(&self, value: &Value) -> Result<Representation, SerializationError>;

    fn deserialize(&self, repr: &Representation) -> Result<Value, SerializationError>;
}

/// Event types a provider accepts.
#[derive(Debug, Clone, Default)]
pub enum ProviderScope {
    #[default]
    Any,
    Only(HashSet<EventType>),
}

impl ProviderScope {
    pub fn only<I>(event_types: I) -> Self
    where
        I: IntoIterator<Item = EventType>,
    {
        Self::Only(event_types.into_iter().collect())
    }

    pub fn contains(&self, event_type: &EventType) -> bool {
        match self {
            Self::Any => true,
            Self::Only(set) => set.contains(event_type),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonStyle {
    Compact,
    Pretty,
    Bytes,
}

/// JSON codec over `serde_json`.
#[derive(Debug, Clone)]
pub struct JsonProvider {
    style: JsonStyle,
    scope: ProviderScope,
}

impl JsonProvider {
    /// Single-line JSON text.
    #[must_use]
    pub fn compact() -> Self {
        Self {
            style: JsonStyle::Compact,
            scope: ProviderScope::Any,
        }
    }

    /// Indented JSON text.
    #[must_use]
    pub fn pretty() -> Self {
        Self {
            style: JsonStyle::Pretty,
            scope: ProviderScope::Any,
        }
    }

    /// UTF-8 JSON as raw bytes.
    #[must_use]
    pub fn bytes() -> Self {
        Self {
            style: JsonStyle::Bytes,
            scope: ProviderScope::Any,
        }
    }

    /// Restrict this provider to some event types.
    #[must_use]
    pub fn with_scope(mut self, scope: ProviderScope) -> Self {
        self.scope = scope;
        self
    }
}

impl SerializationProvider for JsonProvider {
    fn name(&self) -> &str {
        match self.style {
            JsonStyle::Compact => "json",
            JsonStyle::Pretty => "json-pretty",
            JsonStyle::Bytes => "json-bytes",
        }
    }

    fn encoding(&self) -> Encoding {
        match self.style {
            JsonStyle::Compact | JsonStyle::Pretty => Encoding::Text,
            JsonStyle::Bytes => Encoding::Binary,
        }
    }

    fn supports(&self, event_type: &EventType) -> bool {
        self.scope.contains(event_type)
    }

    fn serialize(&self, value: &Value) -> Result<Representation, SerializationError> {
        let out = match self.style {
            JsonStyle::Compact => serde_json::to_string(value).map(Representation::Text),
            JsonStyle::Pretty => serde_json::to_string_pretty(value).map(Representation::Text),
            JsonStyle::Bytes => serde_json::to_vec(value).map(Representation::Binary),
        };
        out.map_err(|e| SerializationError::malformed(self.name(), e))
    }

    fn deserialize(&self, repr: &Representation) -> Result<Value, SerializationError> {
        serde_json::from_slice(repr.as_bytes()).map_err(|e| SerializationError::malformed(self.name(), e))
    }
}

type ProviderRef = Arc<dyn SerializationProvider>;

#[derive(Clone, Default)]
struct Providers {
    registered: Vec<ProviderRef>,
    fallback: Option<ProviderRef>,
}

impl Providers {
    fn resolve(&self, event_type: &EventType) -> Option<&ProviderRef> {
        self.registered
            .iter()
            .chain(self.fallback.iter())
            .find(|p| p.supports(event_type))
    }
}

/// Ordered set of providers, resolved per event type.
///
/// Reads take an immutable snapshot; registration builds a new one and swaps
/// it in.
pub struct ProviderChain {
    current: RwLock<Arc<Providers>>,
    writer: Mutex<()>,
}

impl ProviderChain {
    /// Empty chain: every lookup fails with `UnsupportedType`.
    #[must_use]
    pub fn new() -> Self {
        Self::from_providers(Providers::default())
    }

    /// Chain with compact JSON as the fallback for every event type.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::from_providers(Providers {
            registered: Vec::new(),
            fallback: Some(Arc::new(JsonProvider::compact())),
        })
    }

    fn from_providers(providers: Providers) -> Self {
        Self {
            current: RwLock::new(Arc::new(providers)),
            writer: Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Arc<Providers> {
        Arc::clone(&self.current.read())
    }

    /// Add a provider. It is consulted after earlier registrations and before
    /// the fallback.
    pub fn register(&self, provider: Arc<dyn SerializationProvider>) {
        let _guard = self.writer.lock();
        let mut next = Providers::clone(&self.snapshot());
        info!(provider = provider.name(), position = next.registered.len(), "Serialization provider registered");
        next.registered.push(provider);
        *self.current.write() = Arc::new(next);
    }

    /// Number of providers, fallback included.
    pub fn len(&self) -> usize {
        let snap = self.snapshot();
        snap.registered.len() + usize::from(snap.fallback.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the provider that would handle `event_type`.
    pub fn provider_name(&self, event_type: &EventType) -> Option<String> {
        self.snapshot().resolve(event_type).map(|p| p.name().to_string())
    }

    fn resolve(&self, event_type: &EventType) -> Result<ProviderRef, SerializationError> {
        self.snapshot()
            .resolve(event_type)
            .cloned()
            .ok_or_else(|| SerializationError::UnsupportedType {
                event_type: event_type.to_string(),
            })
    }

    pub fn serialize(
        &self,
        event_type: &EventType,
        value: &Value,
    ) -> Result<Representation, SerializationError> {
        self.resolve(event_type)?.serialize(value)
    }

    pub fn deserialize(
        &self,
        event_type: &EventType,
        repr: &Representation,
    ) -> Result<Value, SerializationError> {
        self.resolve(event_type)?.deserialize(repr)
    }

    /// Serialize a typed value.
    pub fn serialize_as<T: Serialize>(
        &self,
        event_type: &EventType,
        value: &T,
    ) -> Result<Representation, SerializationError> {
        let provider = self.resolve(event_type)?;
        let value = serde_json::to_value(value)
            .map_err(|e| SerializationError::malformed(std::any::type_name::<T>(), e))?;
        provider.serialize(&value)
    }

    /// Deserialize into a typed value.
    ///
    /// # Errors
    ///
    /// `MalformedData` when the representation is not valid for the provider
    /// or does not match the shape of `T`.
    pub fn deserialize_as<T: DeserializeOwned>(
        &self,
        event_type: &EventType,
        repr: &Representation,
    ) -> Result<T, SerializationError> {
        let value = self.deserialize(event_type, repr)?;
        serde_json::from_value(value)
            .map_err(|e| SerializationError::malformed(std::any::type_name::<T>(), e))
    }

    /// Interpret an external payload string for the provider owning
    /// `event_type` (hex-decoding it for binary providers).
    pub fn representation_for(
        &self,
        event_type: &EventType,
        external: String,
    ) -> Result<Representation, SerializationError> {
        match self.resolve(event_type)?.encoding() {
            Encoding::Text => Ok(Representation::Text(external)),
            Encoding::Binary => hex::decode(&external)
                .map(Representation::Binary)
                .map_err(|e| SerializationError::malformed("hex payload", e)),
        }
    }
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("ProviderChain")
            .field(
                "registered",
                &snap.registered.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("fallback", &snap.fallback.as_ref().map(|p| p.name()))
            .finish()
    }
}
