use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broadcast: BroadcastSettings,
    pub sampler: SamplerSettings,
    pub log: LogSettings,
}

/// Host/port the WebSocket server binds to, and the shared secret the
/// default token validator verifies against.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
}

/// Fan-out tuning: per-connection outbound queue depth and the liveness
/// sweep period.
#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastSettings {
    pub send_queue_capacity: usize,
    pub liveness_interval_secs: u64,
}

/// Sampling periods per metric family and the node set the simulated source
/// reports for.
#[derive(Debug, Deserialize, Clone)]
pub struct SamplerSettings {
    pub gpu_period_ms: u64,
    pub system_period_ms: u64,
    pub nodes: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration loaded from files or environment; missing values
/// fall back to defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broadcast: Option<PartialBroadcastSettings>,
    pub sampler: Option<PartialSamplerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBroadcastSettings {
    pub send_queue_capacity: Option<usize>,
    pub liveness_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSamplerSettings {
    pub gpu_period_ms: Option<u64>,
    pub system_period_ms: Option<u64>,
    pub nodes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                jwt_secret: "change-me".to_string(),
            },
            broadcast: BroadcastSettings {
                send_queue_capacity: 64,
                liveness_interval_secs: 30,
            },
            sampler: SamplerSettings {
                gpu_period_ms: 2000,
                system_period_ms: 5000,
                nodes: vec!["dgx-spark-01".to_string(), "dgx-spark-02".to_string()],
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
