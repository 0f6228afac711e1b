//! # Events
//!
//! Defines what flows through the bus: the [`EventType`] discriminant used as
//! the registry key, the immutable [`EventEnvelope`] handed to handlers, and
//! the [`ExternalEnvelope`] shape used when an envelope has to leave the
//! process (logs, persistence hooks owned by callers).

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{SerializationError, ValidationError};
use crate::serialization::{ProviderChain, Representation};

/// Name of an event schema. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType(Arc<str>);

impl EventType {
    /// Parse an event type name.
    ///
    /// # Errors
    ///
    /// `ValidationError::EmptyEventType` when the name is empty or blank.
    pub fn parse(name: impl AsRef<str>) -> Result<Self, ValidationError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyEventType);
        }
        Ok(Self(Arc::from(name)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EventType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EventType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for EventType {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.0.to_string()
    }
}

/// Metadata attached to an event at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Correlates this event with a request or workflow.
    pub correlation_id: Option<String>,
    /// Creation time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Free-form headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            correlation_id: None,
            timestamp: Utc::now(),
            headers: BTreeMap::new(),
        }
    }
}

impl EventMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if matches!(&self.correlation_id, Some(id) if id.trim().is_empty()) {
            return Err(ValidationError::EmptyCorrelationId);
        }
        if self.headers.keys().any(|k| k.trim().is_empty()) {
            return Err(ValidationError::EmptyHeaderName);
        }
        Ok(())
    }
}

/// An event together with its metadata.
///
/// Immutable once built; handlers receive it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    event_type: EventType,
    payload: serde_json::Value,
    metadata: EventMetadata,
}

impl EventEnvelope {
    /// Build an envelope from an already structured payload.
    ///
    /// # Errors
    ///
    /// Fails on an empty event type or invalid metadata.
    pub fn new(
        event_type: impl AsRef<str>,
        payload: serde_json::Value,
        metadata: EventMetadata,
    ) -> Result<Self, ValidationError> {
        let event_type = EventType::parse(event_type)?;
        metadata.validate()?;
        Ok(Self {
            event_type,
            payload,
            metadata,
        })
    }

    /// Build an envelope from any serializable payload.
    pub fn from_payload<T: Serialize>(
        event_type: impl AsRef<str>,
        payload: &T,
        metadata: EventMetadata,
    ) -> Result<Self, crate::BusError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| SerializationError::malformed(std::any::type_name::<T>(), e))?;
        Ok(Self::new(event_type, value, metadata)?)
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.correlation_id.as_deref()
    }

    /// Decode the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// `SerializationError::MalformedData` when the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        T::deserialize(&self.payload)
            .map_err(|e| SerializationError::malformed(std::any::type_name::<T>(), e))
    }

    /// Render the canonical external representation through `providers`.
    pub fn to_external(
        &self,
        providers: &ProviderChain,
    ) -> Result<ExternalEnvelope, SerializationError> {
        let repr = providers.serialize(&self.event_type, &self.payload)?;
        Ok(ExternalEnvelope {
            event_type: self.event_type.to_string(),
            payload: repr.into_external(),
            metadata: ExternalMetadata {
                correlation_id: self.metadata.correlation_id.clone(),
                timestamp: self.metadata.timestamp,
                headers: self.metadata.headers.clone(),
            },
        })
    }
}

/// Canonical external form of an envelope.
///
/// ```json
/// { "eventType": "UserRegistered",
///   "payload": "{\"userId\":\"u1\"}",
///   "metadata": { "correlationId": null, "timestamp": "2024-01-01T00:00:00Z" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEnvelope {
    pub event_type: String,
    /// Provider output: text verbatim, bytes as lowercase hex.
    pub payload: String,
    pub metadata: ExternalMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetadata {
    pub correlation_id: Option<String>,
    /// RFC 3339 / ISO-8601.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl ExternalEnvelope {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, SerializationError> {
        serde_json::to_string(self).map_err(|e| SerializationError::malformed("ExternalEnvelope", e))
    }

    /// Parse from a JSON string.
    pub fn from_json(input: &str) -> Result<Self, SerializationError> {
        serde_json::from_str(input).map_err(|e| SerializationError::malformed("ExternalEnvelope", e))
    }

    /// Rebuild an in-memory envelope, decoding the payload through `providers`.
    pub fn into_envelope(self, providers: &ProviderChain) -> Result<EventEnvelope, crate::BusError> {
        let event_type = EventType::parse(&self.event_type)?;
        let repr = providers.representation_for(&event_type, self.payload)?;
        let payload = providers.deserialize(&event_type, &repr)?;
        let metadata = EventMetadata {
            correlation_id: self.metadata.correlation_id,
            timestamp: self.metadata.timestamp,
            headers: self.metadata.headers,
        };
        Ok(EventEnvelope::new(event_type.as_str(), payload, metadata)?)
    }
}

impl Representation {
    fn into_external(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => hex::encode(bytes),
        }
    }
}
