//! Metric sources
//!
//! A `MetricSource` produces point-in-time values for a metric family on
//! demand; it is a pure function of time with no concurrency concerns of its
//! own. The production deployment queries DCGM and the host OS; the
//! `SimulatedSource` here mimics a small cluster of DGX Spark GB10 nodes
//! (one Blackwell GPU, 20 Cortex cores, 128 GB unified memory each) so the
//! dashboard can run without hardware.

use rand::Rng;
use serde_json::json;

use crate::broadcast::{NodeId, Topic};

/// Metric families sampled on independent timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFamily {
    GpuMetrics,
    SystemStatus,
}

impl MetricFamily {
    pub fn topic(self) -> Topic {
        match self {
            MetricFamily::GpuMetrics => Topic::GpuMetrics,
            MetricFamily::SystemStatus => Topic::SystemStatus,
        }
    }
}

impl std::fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricFamily::GpuMetrics => f.write_str("gpu_metrics"),
            MetricFamily::SystemStatus => f.write_str("system_status"),
        }
    }
}

/// One node's values for one family at one instant.
#[derive(Debug, Clone)]
pub struct Sample {
    pub node_id: NodeId,
    pub values: serde_json::Value,
}

/// Transient sampling failure; the ticker skips the tick and retries on the
/// next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleError(pub String);

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sampling failed: {}", self.0)
    }
}

impl std::error::Error for SampleError {}

pub trait MetricSource: Send + Sync {
    fn sample(&self, family: MetricFamily) -> Result<Vec<Sample>, SampleError>;
}

/// Deterministic-ish generator: a slow sine wave per node (phase-shifted so
/// nodes differ) plus jitter, with temperature and power following load.
pub struct SimulatedSource {
    nodes: Vec<NodeId>,
}

/// Unified memory per GB10 node, in MiB.
const FB_TOTAL_MIB: f64 = 131_072.0;

impl SimulatedSource {
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self { nodes }
    }

    fn gpu_values(&self, node_index: usize, t: f64) -> serde_json::Value {
        let mut rng = rand::thread_rng();
        let phase = node_index as f64 * 1.7;

        let util = (40.0 + 30.0 * (t / 60.0 + phase).sin() + rng.gen_range(-8.0..8.0))
            .clamp(0.0, 100.0);
        let mem_used = FB_TOTAL_MIB * (0.30 + 0.25 * (t / 300.0 + phase).sin().abs());
        let temp = 35.0 + util * 0.45 + rng.gen_range(-2.0..2.0);
        let power = 15.0 + util * 1.15 + rng.gen_range(-3.0..3.0);
        let sm_clock = 1_500.0 + util * 10.0;

        json!({
            "gpu_util_pct": round1(util),
            "mem_used_mib": round1(mem_used),
            "mem_total_mib": FB_TOTAL_MIB,
            "temp_c": round1(temp),
            "power_w": round1(power),
            "sm_clock_mhz": round1(sm_clock),
        })
    }

    fn system_values(&self, node_index: usize, t: f64) -> serde_json::Value {
        let mut rng = rand::thread_rng();
        let phase = node_index as f64 * 2.3;

        let cpu = (25.0 + 20.0 * (t / 90.0 + phase).sin() + rng.gen_range(-5.0..5.0))
            .clamp(0.0, 100.0);
        let mem_used_gb = 128.0 * (0.35 + 0.2 * (t / 240.0 + phase).sin().abs());
        let net_rx = (120.0 + 80.0 * (t / 45.0 + phase).cos() + rng.gen_range(-10.0..10.0))
            .max(0.0);
        let net_tx = (90.0 + 60.0 * (t / 45.0 + phase).sin() + rng.gen_range(-10.0..10.0))
            .max(0.0);

        json!({
            "cpu_util_pct": round1(cpu),
            "mem_used_gb": round1(mem_used_gb),
            "mem_total_gb": 128.0,
            "net_rx_mbps": round1(net_rx),
            "net_tx_mbps": round1(net_tx),
        })
    }
}

impl MetricSource for SimulatedSource {
    fn sample(&self, family: MetricFamily) -> Result<Vec<Sample>, SampleError> {
        let t = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let samples = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| Sample {
                node_id: node.clone(),
                values: match family {
                    MetricFamily::GpuMetrics => self.gpu_values(i, t),
                    MetricFamily::SystemStatus => self.system_values(i, t),
                },
            })
            .collect();
        Ok(samples)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
