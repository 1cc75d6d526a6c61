use serde::{Deserialize, Serialize};

use crate::broadcast::topic::Topic;

/// One published message instance.
///
/// An envelope is created once per publish call and never mutated afterwards;
/// the broadcaster serializes it a single time and hands the same frame to
/// every matching connection. It has no identity beyond its content and is
/// not stored anywhere.
///
/// Wire shape (one JSON object per WebSocket text frame):
///
/// ```json
/// { "type": "gpu_metrics", "timestamp": 1725000000000, "data": { ... } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub topic: Topic,
    /// Unix timestamp in milliseconds at publish time.
    pub timestamp: i64,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Builds an envelope stamped with the current time.
    pub fn new(topic: Topic, data: serde_json::Value) -> Self {
        Self {
            topic,
            timestamp: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    /// Serializes to the single-frame wire form.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
