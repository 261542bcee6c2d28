use crate::{EventSinkError, EventSinkResult, OutboxEvent};
use async_trait::async_trait;
use std::sync::Mutex;

/// Publishes a single outbox event to a broker. Implementations are used by
/// the commit stage's background publisher loop; publish failures are local
/// to that loop and never surface to the original caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> EventSinkResult<()>;
}

/// Discards every event. Used where no broker is configured.
#[derive(Clone, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: &OutboxEvent) -> EventSinkResult<()> {
        Ok(())
    }
}

/// Collects published events in memory. Used by tests that assert on
/// publish order without standing up a broker.
#[derive(Default)]
pub struct BufferedEventSink {
    events: Mutex<Vec<OutboxEvent>>,
}

impl BufferedEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboxEvent> {
        self.events.lock().expect("buffered sink mutex poisoned").clone()
    }
}

#[async_trait]
impl EventSink for BufferedEventSink {
    async fn publish(&self, event: &OutboxEvent) -> EventSinkResult<()> {
        self.events
            .lock()
            .expect("buffered sink mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}

#[cfg(feature = "kafka-producer")]
mod kafka {
    use super::*;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use std::time::Duration;

    /// Publishes events to Kafka, partitioned by `aggregate_id` so a single
    /// proposal's events are observed in commit order downstream.
    pub struct KafkaEventSink {
        producer: FutureProducer,
        topic: String,
    }

    impl KafkaEventSink {
        pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
            Self {
                producer,
                topic: topic.into(),
            }
        }
    }

    #[async_trait]
    impl EventSink for KafkaEventSink {
        async fn publish(&self, event: &OutboxEvent) -> EventSinkResult<()> {
            let serialized =
                serde_json::to_vec(event).map_err(|e| EventSinkError::Serialization(e.to_string()))?;
            let record = FutureRecord::to(&self.topic)
                .key(&event.aggregate_id)
                .payload(&serialized);
            self.producer
                .send(record, Duration::from_secs(5))
                .await
                .map_err(|(e, _)| EventSinkError::Broker(e.to_string()))?;
            Ok(())
        }
    }
}

#[cfg(feature = "kafka-producer")]
pub use kafka::KafkaEventSink;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn buffered_sink_records_publish_order() {
        let sink = BufferedEventSink::new();
        let first = OutboxEvent::new("calculation.completed", "proposal-1", json!({"n": 1}), json!({}));
        let second = OutboxEvent::new("calculation.completed", "proposal-1", json!({"n": 2}), json!({}));
        sink.publish(&first).await.unwrap();
        sink.publish(&second).await.unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload, json!({"n": 1}));
        assert_eq!(events[1].payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn noop_sink_accepts_and_discards() {
        let sink = NoopEventSink;
        let event = OutboxEvent::new("calculation.completed", "proposal-1", json!({}), json!({}));
        assert!(sink.publish(&event).await.is_ok());
    }
}
