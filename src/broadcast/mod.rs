pub mod connection;
pub mod engine;
pub mod envelope;
pub mod topic;

pub use connection::{ConnectionId, ConnectionRecord, Subscription};
pub use engine::{BroadcastStats, Broadcaster, SharedBroadcaster, SubscriptionUpdate};
pub use envelope::Envelope;
pub use topic::{NodeId, Topic};

#[cfg(test)]
mod tests;
