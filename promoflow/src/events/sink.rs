//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

use crate::core::PromotionEvent;

/// Receiver of promotion lifecycle events.
///
/// The engine calls `try_emit` from inside its critical sections, so
/// implementations must not block and must never fail the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &PromotionEvent);

    /// Emits an event without blocking.
    fn try_emit(&self, event: &PromotionEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &PromotionEvent) {}

    fn try_emit(&self, _event: &PromotionEvent) {}
}

/// A sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PromotionEvent) {
        let payload = event.payload();
        if self.level == Level::DEBUG {
            debug!(event_type = %event.event_type, event_data = %payload, "Event: {}", event.event_type);
        } else {
            info!(event_type = %event.event_type, event_data = %payload, "Event: {}", event.event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PromotionEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &PromotionEvent) {
        self.log_event(event);
    }
}

/// A sink that keeps every event, for tests and audit dumps.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PromotionEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PromotionEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PromotionEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Counts events of exactly `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &PromotionEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &PromotionEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        let event = PromotionEvent::new("promotion.proposed");
        NoOpEventSink.emit(&event).await;
        LoggingEventSink::debug().try_emit(&event);
        LoggingEventSink::default().emit(&event).await;
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&PromotionEvent::new("digest.written")).await;
        sink.try_emit(&PromotionEvent::new("promotion.proposed"));
        sink.try_emit(&PromotionEvent::new("promotion.superseded"));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("promotion.").len(), 2);
        assert_eq!(sink.count("digest.written"), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
