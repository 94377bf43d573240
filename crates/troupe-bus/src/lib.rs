//! # troupe-bus
//!
//! The orchestrator's view of the external message bus. Production deploys
//! wire a real broker client behind [`BusClient`]; without one the
//! [`NoopBus`] is substituted and the only change is the loss of external
//! fan-out. Produce calls are fire-and-forget: failures are the
//! implementation's to log, never the caller's to handle.

#![deny(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;

/// Topic names produced (and, for `EXEC`, consumed) by the orchestrator.
pub mod topics {
    /// Inbound execution requests.
    pub const EXEC: &str = "persona.exec.v1";
    /// Streaming execution output chunks.
    pub const OUTPUT: &str = "persona.output.v1";
    /// Execution lifecycle records (completions and failures).
    pub const LIFECYCLE: &str = "persona.lifecycle.v1";
    /// Worker-emitted persona events.
    pub const EVENTS: &str = "persona.events.v1";
    /// Reserved dead-letter topic.
    pub const DLQ: &str = "persona.dlq.v1";
}

/// A produce-capable bus client.
///
/// `produce` must not block and must not fail the caller; implementations
/// buffer or drop internally and log their own errors.
pub trait BusClient: Send + Sync {
    /// Publish `value` onto `topic`, keyed for partition affinity.
    fn produce(&self, topic: &str, key: &str, value: serde_json::Value);
}

/// Shared handle to a bus client.
pub type SharedBus = Arc<dyn BusClient>;

/// Substituted when no broker is configured.
pub struct NoopBus;

impl BusClient for NoopBus {
    fn produce(&self, topic: &str, key: &str, _value: serde_json::Value) {
        tracing::trace!(topic, key, "bus disabled, dropping message");
    }
}

/// In-process bus that records everything produced. Used by tests and
/// available as a local tap.
#[derive(Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<ProducedMessage>>,
}

/// One recorded produce call.
#[derive(Clone, Debug)]
pub struct ProducedMessage {
    pub topic: String,
    pub key: String,
    pub value: serde_json::Value,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message produced so far, in order.
    pub fn messages(&self) -> Vec<ProducedMessage> {
        self.messages.lock().clone()
    }

    /// Messages on one topic, in order.
    pub fn on_topic(&self, topic: &str) -> Vec<ProducedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

impl BusClient for MemoryBus {
    fn produce(&self, topic: &str, key: &str, value: serde_json::Value) {
        self.messages.lock().push(ProducedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn noop_bus_swallows_messages() {
        let bus = NoopBus;
        bus.produce(topics::OUTPUT, "e1", json!({"chunk": "hi"}));
    }

    #[test]
    fn memory_bus_records_in_order() {
        let bus = MemoryBus::new();
        bus.produce(topics::OUTPUT, "e1", json!({"chunk": "a"}));
        bus.produce(topics::LIFECYCLE, "e1", json!({"status": "completed"}));

        let all = bus.messages();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].topic, topics::OUTPUT);
        assert_eq!(all[1].topic, topics::LIFECYCLE);
    }

    #[test]
    fn on_topic_filters() {
        let bus = MemoryBus::new();
        bus.produce(topics::OUTPUT, "e1", json!({"chunk": "a"}));
        bus.produce(topics::OUTPUT, "e2", json!({"chunk": "b"}));
        bus.produce(topics::EVENTS, "e1", json!({"eventType": "user_message"}));

        assert_eq!(bus.on_topic(topics::OUTPUT).len(), 2);
        assert_eq!(bus.on_topic(topics::EVENTS).len(), 1);
        assert!(bus.on_topic(topics::DLQ).is_empty());
    }

    #[test]
    fn topic_names_are_versioned() {
        for topic in [
            topics::EXEC,
            topics::OUTPUT,
            topics::LIFECYCLE,
            topics::EVENTS,
            topics::DLQ,
        ] {
            assert!(topic.starts_with("persona."));
            assert!(topic.ends_with(".v1"));
        }
    }

    #[test]
    fn trait_object_usable_through_arc() {
        let bus: SharedBus = Arc::new(MemoryBus::new());
        bus.produce(topics::OUTPUT, "k", json!(1));
    }
}
