mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BroadcastSettings, LogSettings, SamplerSettings, ServerSettings, Settings,
};
use settings::PartialSettings;

/// Loads configuration from the default file and environment variables,
/// merging whatever is present over built-in defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            jwt_secret: partial
                .server
                .as_ref()
                .and_then(|s| s.jwt_secret.clone())
                .unwrap_or(default.server.jwt_secret),
        },
        broadcast: BroadcastSettings {
            send_queue_capacity: partial
                .broadcast
                .as_ref()
                .and_then(|b| b.send_queue_capacity)
                .unwrap_or(default.broadcast.send_queue_capacity),
            liveness_interval_secs: partial
                .broadcast
                .as_ref()
                .and_then(|b| b.liveness_interval_secs)
                .unwrap_or(default.broadcast.liveness_interval_secs),
        },
        sampler: SamplerSettings {
            gpu_period_ms: partial
                .sampler
                .as_ref()
                .and_then(|s| s.gpu_period_ms)
                .unwrap_or(default.sampler.gpu_period_ms),
            system_period_ms: partial
                .sampler
                .as_ref()
                .and_then(|s| s.system_period_ms)
                .unwrap_or(default.sampler.system_period_ms),
            nodes: partial
                .sampler
                .as_ref()
                .and_then(|s| s.nodes.clone())
                .unwrap_or(default.sampler.nodes),
        },
        log: LogSettings {
            level: partial
                .log
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.log.level),
        },
    })
}
