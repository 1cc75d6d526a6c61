use serde_json::json;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use super::engine::{Broadcaster, SubscriptionUpdate};
use super::envelope::Envelope;
use super::topic::Topic;

fn register_with_capacity(
    broadcaster: &mut Broadcaster,
    capacity: usize,
) -> (String, mpsc::Receiver<WsMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    let id = broadcaster.register(tx);
    (id, rx)
}

fn drain_envelopes(rx: &mut mpsc::Receiver<WsMessage>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        let text = msg.to_text().unwrap();
        out.push(serde_json::from_str(text).unwrap());
    }
    out
}

#[test]
fn register_assigns_id_and_sends_hello() {
    let mut broadcaster = Broadcaster::default();
    let (id, mut rx) = register_with_capacity(&mut broadcaster, 8);
    assert!(!id.is_empty());

    let envelopes = drain_envelopes(&mut rx);
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].topic, Topic::Connection);
    assert_eq!(
        envelopes[0].data["connection_id"].as_str().unwrap(),
        id.as_str()
    );
}

#[test]
fn publish_respects_topic_filter() {
    let mut broadcaster = Broadcaster::default();
    let (id_a, mut rx_a) = register_with_capacity(&mut broadcaster, 8);
    let (id_b, mut rx_b) = register_with_capacity(&mut broadcaster, 8);

    // Disjoint subscriptions: A keeps only gpu_metrics, B only alerts.
    broadcaster.update_subscription(&id_a, &Topic::default_set(), &[], SubscriptionUpdate::Remove);
    broadcaster.update_subscription(&id_a, &[Topic::GpuMetrics], &[], SubscriptionUpdate::Add);
    broadcaster.update_subscription(&id_b, &Topic::default_set(), &[], SubscriptionUpdate::Remove);
    broadcaster.update_subscription(&id_b, &[Topic::Alert], &[], SubscriptionUpdate::Add);
    drain_envelopes(&mut rx_a);
    drain_envelopes(&mut rx_b);

    broadcaster.publish(Topic::GpuMetrics, Some("dgx-spark-01"), json!({"util": 42}));
    broadcaster.publish(Topic::Alert, None, json!({"severity": "warning"}));

    let a = drain_envelopes(&mut rx_a);
    let b = drain_envelopes(&mut rx_b);
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].topic, Topic::GpuMetrics);
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].topic, Topic::Alert);
}

#[test]
fn publish_respects_node_filter() {
    let mut broadcaster = Broadcaster::default();
    let (id, mut rx) = register_with_capacity(&mut broadcaster, 8);
    broadcaster.update_subscription(
        &id,
        &[],
        &["dgx-spark-01".to_string()],
        SubscriptionUpdate::Add,
    );
    drain_envelopes(&mut rx);

    broadcaster.publish(Topic::GpuMetrics, Some("dgx-spark-01"), json!({"util": 10}));
    broadcaster.publish(Topic::GpuMetrics, Some("dgx-spark-02"), json!({"util": 90}));
    // Node-less envelopes pass the filter.
    broadcaster.publish(Topic::Alert, None, json!({"severity": "info"}));

    let received = drain_envelopes(&mut rx);
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].data["util"], 10);
    assert_eq!(received[1].topic, Topic::Alert);
}

#[test]
fn slow_consumer_does_not_block_others() {
    let mut broadcaster = Broadcaster::default();
    // A's queue is tiny and never drained; B has room for everything.
    let (_id_a, _rx_a) = register_with_capacity(&mut broadcaster, 2);
    let (_id_b, mut rx_b) = register_with_capacity(&mut broadcaster, 128);
    drain_envelopes(&mut rx_b);

    for i in 0..100 {
        broadcaster.publish(Topic::GpuMetrics, Some("dgx-spark-01"), json!({"seq": i}));
    }

    let received = drain_envelopes(&mut rx_b);
    assert_eq!(received.len(), 100);
    // Per-topic order matches publish order.
    for (i, envelope) in received.iter().enumerate() {
        assert_eq!(envelope.data["seq"], i);
    }
    // A is still registered: a full queue drops samples, it is not an error.
    assert_eq!(broadcaster.stats().connection_count, 2);
}

#[test]
fn closed_receiver_is_unregistered_on_publish() {
    let mut broadcaster = Broadcaster::default();
    let (id, rx) = register_with_capacity(&mut broadcaster, 8);
    drop(rx);

    broadcaster.publish(Topic::GpuMetrics, None, json!({}));
    assert!(!broadcaster.contains(&id));
}

#[test]
fn unregister_is_idempotent() {
    let mut broadcaster = Broadcaster::default();
    let (id, _rx) = register_with_capacity(&mut broadcaster, 8);
    let (id_other, _rx_other) = register_with_capacity(&mut broadcaster, 8);

    broadcaster.unregister(&id);
    broadcaster.unregister(&id);
    broadcaster.unregister("never-existed");

    assert!(!broadcaster.contains(&id));
    assert!(broadcaster.contains(&id_other));
}

#[test]
fn subscription_updates_are_idempotent() {
    let mut broadcaster = Broadcaster::default();
    let (id, _rx) = register_with_capacity(&mut broadcaster, 8);

    broadcaster.update_subscription(&id, &[Topic::GpuMetrics], &[], SubscriptionUpdate::Add);
    broadcaster.update_subscription(&id, &[Topic::GpuMetrics], &[], SubscriptionUpdate::Add);
    let topics = broadcaster.subscription_of(&id).unwrap().topics.clone();

    broadcaster.update_subscription(&id, &[Topic::JobStatus], &[], SubscriptionUpdate::Remove);
    broadcaster.update_subscription(&id, &[Topic::JobStatus], &[], SubscriptionUpdate::Remove);
    let after = broadcaster.subscription_of(&id).unwrap();
    assert_eq!(after.topics.len(), topics.len() - 1);
    assert!(!after.topics.contains(&Topic::JobStatus));
}

#[test]
fn authentication_is_one_way() {
    let mut broadcaster = Broadcaster::default();
    let (id, _rx) = register_with_capacity(&mut broadcaster, 8);

    assert!(!broadcaster.is_authenticated(&id));
    broadcaster.mark_authenticated(&id, "ops");
    assert!(broadcaster.is_authenticated(&id));

    // A later authentication attempt, failed or otherwise, never reverts the
    // flag; only the first principal sticks.
    broadcaster.mark_authenticated(&id, "someone-else");
    let sub = broadcaster.subscription_of(&id).unwrap();
    assert!(sub.authenticated);
    assert_eq!(sub.user_id.as_deref(), Some("ops"));
}

#[test]
fn liveness_sweep_reaps_silent_connections() {
    let mut broadcaster = Broadcaster::default();
    let (id_silent, _rx_silent) = register_with_capacity(&mut broadcaster, 8);
    let (id_alive, _rx_alive) = register_with_capacity(&mut broadcaster, 8);

    // First sweep arms both; the responsive client acks, the silent one
    // does not.
    broadcaster.liveness_sweep();
    broadcaster.touch(&id_alive);

    broadcaster.liveness_sweep();
    assert!(!broadcaster.contains(&id_silent));
    assert!(broadcaster.contains(&id_alive));
}

#[test]
fn liveness_sweep_never_reaps_acking_connection() {
    let mut broadcaster = Broadcaster::default();
    let (id, _rx) = register_with_capacity(&mut broadcaster, 16);

    for _ in 0..5 {
        broadcaster.liveness_sweep();
        broadcaster.touch(&id);
    }
    assert!(broadcaster.contains(&id));
}

#[test]
fn stats_counts_connections_and_topics() {
    let mut broadcaster = Broadcaster::default();
    let (id_a, _rx_a) = register_with_capacity(&mut broadcaster, 8);
    let (_id_b, _rx_b) = register_with_capacity(&mut broadcaster, 8);

    broadcaster.mark_authenticated(&id_a, "ops");
    broadcaster.update_subscription(&id_a, &Topic::default_set(), &[], SubscriptionUpdate::Remove);
    broadcaster.update_subscription(&id_a, &[Topic::Alert], &[], SubscriptionUpdate::Add);

    let stats = broadcaster.stats();
    assert_eq!(stats.connection_count, 2);
    assert_eq!(stats.authenticated_count, 1);
    assert_eq!(stats.per_topic_subscribers[&Topic::Alert], 2);
    assert_eq!(stats.per_topic_subscribers[&Topic::GpuMetrics], 1);
}
