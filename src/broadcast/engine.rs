//! Broadcast engine
//!
//! The in-memory fan-out core responsible for:
//! - owning the registry of live client connections
//! - delivering envelopes to every connection whose topic/node filter matches
//! - one-way authentication marking and per-connection subscription updates
//! - the periodic liveness sweep that reaps unresponsive peers
//!
//! Concurrency and usage notes:
//! - The public API is synchronous and designed to be held behind a lock
//!   (`Arc<Mutex<Broadcaster>>`) shared by the transport, the samplers and
//!   the sweeper task. No method performs network I/O: outbound delivery is
//!   a `try_send` into each connection's bounded channel, so the lock is
//!   never held across a socket write and a slow client cannot stall the
//!   registry for others.
//! - A connection whose channel is full simply misses that envelope. The
//!   stream is a live telemetry feed, not a durable log; dropping a stale
//!   sample in favor of the next one beats unbounded buffering.
//! - `publish` never returns an error. It is called from timer loops that
//!   must not be able to crash.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broadcast::connection::{ConnectionId, ConnectionRecord};
use crate::broadcast::envelope::Envelope;
use crate::broadcast::topic::{NodeId, Topic};

/// Shared handle used by the transport, samplers and sweeper.
pub type SharedBroadcaster = Arc<Mutex<Broadcaster>>;

/// Direction of a subscription update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionUpdate {
    Add,
    Remove,
}

/// Snapshot of registry state for operational visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastStats {
    pub connection_count: usize,
    pub authenticated_count: usize,
    pub per_topic_subscribers: HashMap<Topic, usize>,
}

#[derive(Debug, Default)]
pub struct Broadcaster {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    send_queue_capacity: usize,
}

impl Broadcaster {
    /// Default capacity of each connection's outbound queue. Roughly two
    /// sweep intervals worth of samples for a full default subscription.
    pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 64;

    pub fn new(send_queue_capacity: usize) -> Self {
        Self {
            connections: HashMap::new(),
            send_queue_capacity,
        }
    }

    /// Capacity the transport should use when creating a connection's
    /// outbound channel.
    pub fn send_queue_capacity(&self) -> usize {
        if self.send_queue_capacity == 0 {
            Self::DEFAULT_SEND_QUEUE_CAPACITY
        } else {
            self.send_queue_capacity
        }
    }

    /// Registers a connection that has completed its WebSocket handshake.
    ///
    /// The record starts with the default telemetry subscription and an empty
    /// node filter (all nodes). A `connection` envelope carrying the assigned
    /// id is queued immediately so the client learns its identity. Never
    /// fails; the id is returned for the transport to key further calls.
    pub fn register(&mut self, sender: Sender<WsMessage>) -> ConnectionId {
        let record = ConnectionRecord::new(sender);
        let id = record.id.clone();

        let hello = Envelope::new(
            Topic::Connection,
            json!({ "status": "connected", "connection_id": id }),
        );
        Self::offer(&record, &hello);

        self.connections.insert(id.clone(), record);
        info!("registered connection {id}");
        id
    }

    /// Removes a connection from the registry. Idempotent: unknown ids are a
    /// no-op, so the reader loop, the send loop and the liveness sweep can
    /// all race to clean up the same connection.
    pub fn unregister(&mut self, id: &str) {
        if self.connections.remove(id).is_some() {
            info!("unregistered connection {id}");
        }
    }

    /// Fans an envelope out to every connection whose subscription matches.
    ///
    /// Delivery is best-effort and at-most-once per connection: a full queue
    /// drops the envelope for that connection only, and a closed queue (the
    /// send loop already exited) unregisters the connection. Neither case
    /// propagates to the caller.
    pub fn publish(&mut self, topic: Topic, node_id: Option<&str>, data: serde_json::Value) {
        let envelope = Envelope::new(topic, data);
        let frame = match envelope.to_frame() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize {topic} envelope: {e}");
                return;
            }
        };
        let ws_msg = WsMessage::text(frame);

        let mut closed = Vec::new();
        for record in self.connections.values() {
            if !record.subscription.matches(topic, node_id) {
                continue;
            }
            match record.sender.try_send(ws_msg.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("queue full for {}, dropping {topic} sample", record.id);
                }
                Err(TrySendError::Closed(_)) => {
                    closed.push(record.id.clone());
                }
            }
        }
        for id in closed {
            self.unregister(&id);
        }
    }

    /// Queues an envelope for one specific connection, bypassing its
    /// subscription filter. Used by the transport for control replies
    /// (handshake, rejections, pong). Unknown ids are ignored.
    pub fn send_to(&mut self, id: &str, envelope: &Envelope) {
        let Some(record) = self.connections.get(id) else {
            return;
        };
        if !Self::offer(record, envelope) {
            self.unregister(id);
        }
    }

    /// Adds or removes topics (and node-filter entries, on add) for one
    /// connection. Idempotent, and never affects any other connection.
    /// Removing every topic leaves the connection registered but idle.
    pub fn update_subscription(
        &mut self,
        id: &str,
        topics: &[Topic],
        node_ids: &[NodeId],
        mode: SubscriptionUpdate,
    ) {
        let Some(record) = self.connections.get_mut(id) else {
            return;
        };
        match mode {
            SubscriptionUpdate::Add => {
                record.subscription.topics.extend(topics.iter().copied());
                record
                    .subscription
                    .node_filter
                    .extend(node_ids.iter().cloned());
            }
            SubscriptionUpdate::Remove => {
                for topic in topics {
                    record.subscription.topics.remove(topic);
                }
            }
        }
        debug!(
            "connection {id} now subscribed to {} topics ({} node filter entries)",
            record.subscription.topics.len(),
            record.subscription.node_filter.len()
        );
    }

    /// Marks a connection authenticated as `user_id`. One-way: once set, the
    /// flag survives later failed authentication attempts for the lifetime
    /// of the connection.
    pub fn mark_authenticated(&mut self, id: &str, user_id: &str) {
        if let Some(record) = self.connections.get_mut(id) {
            if !record.subscription.authenticated {
                record.subscription.authenticated = true;
                record.subscription.user_id = Some(user_id.to_string());
                info!("connection {id} authenticated as {user_id}");
            }
        }
    }

    /// Refreshes a connection's liveness clock and disarms the pending-probe
    /// flag. Called for every `ping` the client sends.
    pub fn touch(&mut self, id: &str) {
        if let Some(record) = self.connections.get_mut(id) {
            record.last_seen = record.last_seen.max(chrono::Utc::now().timestamp_millis());
            record.awaiting_ack = false;
        }
    }

    /// Whether a connection is currently marked authenticated.
    pub fn is_authenticated(&self, id: &str) -> bool {
        self.connections
            .get(id)
            .map(|r| r.subscription.authenticated)
            .unwrap_or(false)
    }

    /// One pass of dead-peer reaping, invoked on a fixed period.
    ///
    /// Connections still awaiting an ack from the previous pass are closed
    /// and unregistered; everyone else gets a probe envelope and has the
    /// awaiting flag armed for the next pass. Dropping the record closes the
    /// channel, which ends the send loop and so the socket.
    pub fn liveness_sweep(&mut self) {
        let dead: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|r| r.awaiting_ack)
            .map(|r| r.id.clone())
            .collect();
        for id in dead {
            warn!("connection {id} missed liveness probe, reaping");
            self.unregister(&id);
        }

        let probe = Envelope::new(Topic::Pong, json!({ "probe": true }));
        let mut closed = Vec::new();
        for record in self.connections.values_mut() {
            if Self::offer(record, &probe) {
                record.awaiting_ack = true;
            } else {
                closed.push(record.id.clone());
            }
        }
        for id in closed {
            self.unregister(&id);
        }
    }

    /// Registry snapshot: connection totals and per-topic subscriber counts.
    pub fn stats(&self) -> BroadcastStats {
        let mut per_topic_subscribers = HashMap::new();
        let mut authenticated_count = 0;
        for record in self.connections.values() {
            if record.subscription.authenticated {
                authenticated_count += 1;
            }
            for topic in &record.subscription.topics {
                *per_topic_subscribers.entry(*topic).or_insert(0) += 1;
            }
        }
        BroadcastStats {
            connection_count: self.connections.len(),
            authenticated_count,
            per_topic_subscribers,
        }
    }

    /// Non-blocking send of a control envelope to one record. Returns false
    /// only when the channel is closed; a full queue counts as delivered
    /// (dropped) to keep control paths non-blocking too.
    fn offer(record: &ConnectionRecord, envelope: &Envelope) -> bool {
        let frame = match envelope.to_frame() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize {} envelope: {e}", envelope.topic);
                return true;
            }
        };
        match record.sender.try_send(WsMessage::text(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("queue full for {}, dropping {}", record.id, envelope.topic);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn subscription_of(&self, id: &str) -> Option<&crate::broadcast::Subscription> {
        self.connections.get(id).map(|r| &r.subscription)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    #[cfg(test)]
    pub(crate) fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }
}

/// Runs `liveness_sweep` forever on a fixed period. Spawned once at startup
/// next to the samplers.
pub async fn run_liveness_sweeper(broadcaster: SharedBroadcaster, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    // The first tick fires immediately; skip it so fresh connections get a
    // full period before their first probe.
    interval.tick().await;
    loop {
        interval.tick().await;
        let mut broadcaster = broadcaster.lock().unwrap();
        broadcaster.liveness_sweep();
    }
}
