use serde::{Deserialize, Serialize};

use crate::broadcast::Topic;

/// Control messages a client may send, one JSON object per frame.
///
/// Decoded once at the boundary into this closed variant set. A frame whose
/// `type` tag is unrecognized lands on `Unknown`, which takes the
/// protocol-fault path: an explicit rejection envelope back to the sender,
/// connection left open.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe {
        topics: Vec<Topic>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_ids: Option<Vec<String>>,
    },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topics: Vec<Topic> },

    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "command")]
    Command {
        action: String,
        #[serde(default)]
        params: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

/// Claims carried by the HS256 tokens the default validator accepts.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}
