//! Promotion lifecycle events delivered to event sinks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Digest, DigestRecord, Environment, PromotionRequest};

/// An event emitted by the engine.
///
/// Events are consumed by event sinks for logging, monitoring or audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionEvent {
    /// The event type (e.g., "promotion.proposed").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (ISO 8601).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl PromotionEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: crate::utils::iso_timestamp(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the payload handed to sinks.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let mut map: serde_json::Map<String, serde_json::Value> =
            self.data.clone().into_iter().collect();
        map.insert("timestamp".to_string(), serde_json::json!(self.timestamp));
        serde_json::Value::Object(map)
    }

    fn with_request(self, request: &PromotionRequest) -> Self {
        self.add_data("request_id", serde_json::json!(request.id.to_string()))
            .add_data("from", serde_json::json!(request.from))
            .add_data("to", serde_json::json!(request.to))
            .add_data("digest", serde_json::json!(request.digest))
    }

    /// A "digest.written" event.
    #[must_use]
    pub fn written(record: &DigestRecord) -> Self {
        Self::new("digest.written")
            .add_data("environment", serde_json::json!(record.environment))
            .add_data("digest", serde_json::json!(record.digest))
            .add_data("source", serde_json::json!(record.source.to_string()))
            .add_data("revision", serde_json::json!(record.revision))
    }

    /// A "digest.stale_discarded" event for a build older than the latest accepted one.
    #[must_use]
    pub fn stale_discarded(digest: &Digest, sequence: u64, latest: u64) -> Self {
        Self::new("digest.stale_discarded")
            .add_data("environment", serde_json::json!(Environment::Dev))
            .add_data("digest", serde_json::json!(digest))
            .add_data("sequence", serde_json::json!(sequence))
            .add_data("latest_sequence", serde_json::json!(latest))
    }

    /// A "promotion.proposed" event.
    #[must_use]
    pub fn proposed(request: &PromotionRequest) -> Self {
        let locator = request.handle.as_ref().map(|h| h.locator.clone());
        Self::new("promotion.proposed")
            .with_request(request)
            .add_data("locator", serde_json::json!(locator))
    }

    /// A "promotion.superseded" event.
    #[must_use]
    pub fn superseded(request: &PromotionRequest, by: &Digest) -> Self {
        Self::new("promotion.superseded")
            .with_request(request)
            .add_data("superseded_by", serde_json::json!(by))
    }

    /// A "promotion.approved" event.
    #[must_use]
    pub fn approved(request: &PromotionRequest) -> Self {
        Self::new("promotion.approved").with_request(request)
    }

    /// A "promotion.applied" event.
    #[must_use]
    pub fn applied(request: &PromotionRequest, record: &DigestRecord) -> Self {
        Self::new("promotion.applied")
            .with_request(request)
            .add_data("revision", serde_json::json!(record.revision))
    }

    /// A "promotion.rejected" event.
    #[must_use]
    pub fn rejected(request: &PromotionRequest) -> Self {
        Self::new("promotion.rejected").with_request(request)
    }

    /// A "signal.rejected" event.
    #[must_use]
    pub fn signal_rejected(reason: &str, kind: Option<&str>) -> Self {
        Self::new("signal.rejected")
            .add_data("reason", serde_json::json!(reason))
            .add_data("kind", serde_json::json!(kind))
    }
}
