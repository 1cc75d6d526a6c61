use serde::{Deserialize, Serialize};

/// Identifier of a cluster node, e.g. `dgx-spark-01`.
pub type NodeId = String;

/// Classifies every message that crosses the wire.
///
/// The set is closed: the dashboard knows every stream it can render, and the
/// broadcaster filters delivery by comparing these tags against each
/// connection's subscription. Serialized in snake_case so the wire carries
/// `"gpu_metrics"`, `"system_status"` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Handshake acks, id assignment and error/rejection replies.
    Connection,
    /// Per-GPU utilization, memory, temperature, power and clock samples.
    GpuMetrics,
    /// Host-level CPU/memory/network samples.
    SystemStatus,
    /// Job lifecycle updates from the scheduler.
    JobStatus,
    /// Threshold and health alerts.
    Alert,
    /// Liveness probe and ping acknowledgment.
    Pong,
}

impl Topic {
    /// Topics a freshly registered connection receives before it sends any
    /// `subscribe` frame. Control topics (`connection`, `pong`) are always
    /// delivered directly and are not part of any subscription.
    pub fn default_set() -> Vec<Topic> {
        vec![
            Topic::GpuMetrics,
            Topic::SystemStatus,
            Topic::JobStatus,
            Topic::Alert,
        ]
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Topic::Connection => "connection",
            Topic::GpuMetrics => "gpu_metrics",
            Topic::SystemStatus => "system_status",
            Topic::JobStatus => "job_status",
            Topic::Alert => "alert",
            Topic::Pong => "pong",
        };
        f.write_str(name)
    }
}
