use std::collections::HashSet;

use tokio::sync::mpsc::Sender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broadcast::topic::{NodeId, Topic};

/// Unique identifier assigned to a connection at registration.
pub type ConnectionId = String;

/// Per-connection subscription state.
///
/// Owned exclusively by its connection: only control messages arriving on
/// that same connection mutate it. An empty `node_filter` means "all nodes";
/// adding entries narrows future delivery. `authenticated` only ever moves
/// false to true; to re-authenticate a client must reconnect.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub topics: HashSet<Topic>,
    pub node_filter: HashSet<NodeId>,
    pub authenticated: bool,
    pub user_id: Option<String>,
}

impl Default for Subscription {
    fn default() -> Self {
        Self {
            topics: Topic::default_set().into_iter().collect(),
            node_filter: HashSet::new(),
            authenticated: false,
            user_id: None,
        }
    }
}

impl Subscription {
    /// Delivery filter from the data-model invariant: topic must be
    /// subscribed, and the node filter (when non-empty) must contain the
    /// envelope's node. Envelopes without a node (job status, alerts) pass
    /// the node check unconditionally.
    pub fn matches(&self, topic: Topic, node_id: Option<&str>) -> bool {
        if !self.topics.contains(&topic) {
            return false;
        }
        match node_id {
            Some(node) => self.node_filter.is_empty() || self.node_filter.contains(node),
            None => true,
        }
    }
}

/// A live client connection as the broadcaster sees it.
///
/// `sender` is the bounded channel feeding that connection's send-loop task;
/// the broadcaster never writes to the socket directly. `awaiting_ack` is
/// armed by the liveness sweep and cleared by any ping from the client; a
/// connection still awaiting when the next sweep runs is considered dead.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub subscription: Subscription,
    pub awaiting_ack: bool,
    /// Millis timestamp of the last liveness-relevant traffic. Monotonically
    /// non-decreasing for the lifetime of the record.
    pub last_seen: i64,
    pub sender: Sender<WsMessage>,
}

impl ConnectionRecord {
    pub fn new(sender: Sender<WsMessage>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subscription: Subscription::default(),
            awaiting_ack: false,
            last_seen: chrono::Utc::now().timestamp_millis(),
            sender,
        }
    }
}
