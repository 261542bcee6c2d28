pub mod model;
pub mod producer;

pub use model::{EventSinkError, EventSinkResult, OutboxEvent};
pub use producer::{BufferedEventSink, EventSink, NoopEventSink};
#[cfg(feature = "kafka-producer")]
pub use producer::KafkaEventSink;
