//! # Event Envelope
//!
//! The unit of work flowing producer → broker → consumer.
//!
//! ## Wire Layout
//!
//! The record body is the JSON-encoded payload and nothing else. Envelope
//! metadata travels as record headers (see [`crate::headers`]), so retry and
//! dead-letter republication can forward the body byte-for-byte.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Unique identifier generated by the producer at publish time
//! - `partition_key`: Equal to `event_id`; picks the partition and thereby the ordering domain
//! - `occurred_at`: Timestamp when the envelope was built
//! - `source_module`: Module that produced the event
//! - `source_version`: Semantic version of the source module
//! - `correlation_id`: Links related events in a business transaction
//! - `payload`: Event-specific data (generic type parameter)

use crate::{headers, BusError, BusMessage, BusResult, Headers};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every event published to the broker
///
/// Envelopes are never mutated after construction; retries carry their
/// attempt counter in headers next to the unchanged body.
///
/// # Examples
///
/// ```rust
/// use event_bus::EventEnvelope;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct ProductCreated {
///     title: String,
///     quantity: u32,
/// }
///
/// let envelope = EventEnvelope::new(
///     "products".to_string(),
///     ProductCreated {
///         title: "Widget".to_string(),
///         quantity: 3,
///     },
/// )
/// .with_correlation_id(Some("order-456".to_string()));
///
/// assert_eq!(envelope.partition_key(), envelope.event_id);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier
    pub event_id: String,

    /// Timestamp when the envelope was built
    pub occurred_at: DateTime<Utc>,

    /// Module that generated the event (e.g., "products")
    pub source_module: String,

    /// Semantic version of the source module
    pub source_version: String,

    /// Links related events in a business transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Event-specific payload
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a generated v4 UUID as its id
    pub fn new(source_module: String, payload: T) -> Self {
        Self::with_event_id(Uuid::new_v4().to_string(), source_module, payload)
    }

    /// Create an envelope with an explicit event id
    pub fn with_event_id(event_id: String, source_module: String, payload: T) -> Self {
        Self {
            event_id,
            occurred_at: Utc::now(),
            source_module,
            source_version: "1.0.0".to_string(),
            correlation_id: None,
            payload,
        }
    }

    /// Set the source version
    pub fn with_source_version(mut self, version: String) -> Self {
        self.source_version = version;
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Partition key of this envelope (always the event id)
    pub fn partition_key(&self) -> &str {
        &self.event_id
    }

    /// Envelope metadata as record headers
    pub fn to_headers(&self) -> Headers {
        let mut out = Headers::new();
        out.insert(headers::EVENT_ID.to_string(), self.event_id.clone());
        out.insert(headers::SOURCE_MODULE.to_string(), self.source_module.clone());
        out.insert(headers::SOURCE_VERSION.to_string(), self.source_version.clone());
        out.insert(headers::OCCURRED_AT.to_string(), self.occurred_at.to_rfc3339());
        if let Some(correlation_id) = &self.correlation_id {
            out.insert(headers::CORRELATION_ID.to_string(), correlation_id.clone());
        }
        out
    }
}

impl<T: Serialize> EventEnvelope<T> {
    /// JSON body of the record (payload only)
    pub fn payload_bytes(&self) -> BusResult<Vec<u8>> {
        serde_json::to_vec(&self.payload).map_err(|e| BusError::SerializationError(e.to_string()))
    }
}

impl<T: DeserializeOwned> EventEnvelope<T> {
    /// Rebuild an envelope from a consumed record
    ///
    /// The event id falls back to the record key when the header is missing.
    pub fn from_message(message: &BusMessage) -> BusResult<Self> {
        let payload: T = serde_json::from_slice(&message.payload)
            .map_err(|e| BusError::SerializationError(e.to_string()))?;

        let event_id = message
            .header(headers::EVENT_ID)
            .unwrap_or(message.key.as_str())
            .to_string();
        let occurred_at = message
            .header(headers::OCCURRED_AT)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let envelope = Self {
            event_id,
            occurred_at,
            source_module: message
                .header(headers::SOURCE_MODULE)
                .unwrap_or("unknown")
                .to_string(),
            source_version: message
                .header(headers::SOURCE_VERSION)
                .unwrap_or_default()
                .to_string(),
            correlation_id: message.header(headers::CORRELATION_ID).map(str::to_string),
            payload,
        };
        validate_envelope(&envelope)?;
        Ok(envelope)
    }
}

/// Validate envelope invariants before publication
///
/// # Validation Rules
///
/// - `event_id`: Must be non-blank
/// - `partition_key`: Must be non-blank
/// - `source_module`: Must be non-blank
pub fn validate_envelope<T>(envelope: &EventEnvelope<T>) -> BusResult<()> {
    if envelope.event_id.trim().is_empty() {
        return Err(BusError::InvalidEnvelope("event_id cannot be empty".to_string()));
    }
    if envelope.partition_key().trim().is_empty() {
        return Err(BusError::InvalidEnvelope("partition_key cannot be empty".to_string()));
    }
    if envelope.source_module.trim().is_empty() {
        return Err(BusError::InvalidEnvelope("source_module cannot be empty".to_string()));
    }
    Ok(())
}
