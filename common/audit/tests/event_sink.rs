use common_audit::{BufferedEventSink, EventSink, NoopEventSink, OutboxEvent};
use serde_json::json;

#[tokio::test]
async fn buffered_sink_preserves_insertion_order_per_aggregate() {
    let sink = BufferedEventSink::new();
    for n in 0..3 {
        let event = OutboxEvent::new(
            "calculation.completed",
            "proposal-1",
            json!({"n": n}),
            json!({"checksum": format!("c{n}")}),
        );
        sink.publish(&event).await.expect("publish");
    }
    let events = sink.events();
    assert_eq!(events.len(), 3);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.payload, json!({"n": i}));
        assert_eq!(event.aggregate_id, "proposal-1");
    }
}

#[tokio::test]
async fn noop_sink_never_errors() {
    let sink = NoopEventSink;
    let event = OutboxEvent::new("calculation.completed", "proposal-2", json!({}), json!({}));
    assert!(sink.publish(&event).await.is_ok());
}
