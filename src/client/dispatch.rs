//! Typed dispatch of inbound envelopes.
//!
//! The connection manager decodes each frame once and routes it here by
//! topic. Consumers read latest-known values; there is no gapless history
//! (samples may be dropped server-side under backpressure or lost across a
//! reconnect), so every container keeps only what a dashboard needs: the
//! most recent sample per node, a capped list of recent alerts, and the raw
//! last envelope for diagnostics.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::watch;

use crate::broadcast::{Envelope, NodeId, Topic};

/// Alerts retained before the oldest is evicted.
const MAX_RECENT_ALERTS: usize = 50;

#[derive(Debug)]
pub struct TelemetryState {
    gpu_metrics: Mutex<HashMap<NodeId, serde_json::Value>>,
    system_status: Mutex<HashMap<NodeId, serde_json::Value>>,
    job_status: Mutex<Option<serde_json::Value>>,
    alerts: Mutex<VecDeque<serde_json::Value>>,
    last_envelope: Mutex<Option<Envelope>>,
    update_tx: watch::Sender<u64>,
}

impl Default for TelemetryState {
    fn default() -> Self {
        let (update_tx, _) = watch::channel(0);
        Self {
            gpu_metrics: Mutex::new(HashMap::new()),
            system_status: Mutex::new(HashMap::new()),
            job_status: Mutex::new(None),
            alerts: Mutex::new(VecDeque::new()),
            last_envelope: Mutex::new(None),
            update_tx,
        }
    }
}

impl TelemetryState {
    /// Routes one decoded envelope into its per-topic container. Envelopes
    /// on control topics only update the diagnostic last-message slot.
    pub fn apply(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::GpuMetrics => Self::store_by_node(&self.gpu_metrics, &envelope),
            Topic::SystemStatus => Self::store_by_node(&self.system_status, &envelope),
            Topic::JobStatus => {
                *self.job_status.lock().unwrap() = Some(envelope.data.clone());
            }
            Topic::Alert => {
                let mut alerts = self.alerts.lock().unwrap();
                if alerts.len() == MAX_RECENT_ALERTS {
                    alerts.pop_front();
                }
                alerts.push_back(envelope.data.clone());
            }
            Topic::Connection | Topic::Pong => {}
        }
        *self.last_envelope.lock().unwrap() = Some(envelope);
        self.update_tx.send_modify(|seq| *seq += 1);
    }

    fn store_by_node(map: &Mutex<HashMap<NodeId, serde_json::Value>>, envelope: &Envelope) {
        if let Some(node) = envelope.data.get("node_id").and_then(|n| n.as_str()) {
            map.lock()
                .unwrap()
                .insert(node.to_string(), envelope.data.clone());
        }
    }

    /// Latest GPU sample for a node, if any has arrived.
    pub fn gpu_metrics(&self, node_id: &str) -> Option<serde_json::Value> {
        self.gpu_metrics.lock().unwrap().get(node_id).cloned()
    }

    pub fn system_status(&self, node_id: &str) -> Option<serde_json::Value> {
        self.system_status.lock().unwrap().get(node_id).cloned()
    }

    pub fn job_status(&self) -> Option<serde_json::Value> {
        self.job_status.lock().unwrap().clone()
    }

    /// Recent alerts, oldest first.
    pub fn alerts(&self) -> Vec<serde_json::Value> {
        self.alerts.lock().unwrap().iter().cloned().collect()
    }

    /// Raw last envelope received on any topic, for diagnostics.
    pub fn last_envelope(&self) -> Option<Envelope> {
        self.last_envelope.lock().unwrap().clone()
    }

    /// A watch receiver that ticks after every applied envelope; observers
    /// await it instead of polling.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.update_tx.subscribe()
    }
}
