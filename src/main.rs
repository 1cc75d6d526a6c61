#![allow(dead_code)]
mod broadcast;
mod client;
mod config;
mod sampler;
mod transport;
mod utils;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use broadcast::Broadcaster;
use broadcast::engine::run_liveness_sweeper;
use sampler::{MetricFamily, SimulatedSource, run_sampler};
use transport::auth::JwtValidator;
use transport::command::LoggingExecutor;
use transport::websocket::{Collaborators, start_websocket_server};

use crate::config::load_config;

#[tokio::main]
async fn main() {
    let settings = load_config().expect("Failed to load configuration");
    utils::logging::init(&settings.log);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let broadcaster = Arc::new(Mutex::new(Broadcaster::new(
        settings.broadcast.send_queue_capacity,
    )));
    let collaborators = Arc::new(Collaborators {
        validator: Arc::new(JwtValidator::new(settings.server.jwt_secret.clone())),
        executor: Arc::new(LoggingExecutor),
    });

    let source = Arc::new(SimulatedSource::new(settings.sampler.nodes.clone()));
    tokio::spawn(run_sampler(
        broadcaster.clone(),
        source.clone(),
        MetricFamily::GpuMetrics,
        Duration::from_millis(settings.sampler.gpu_period_ms),
    ));
    tokio::spawn(run_sampler(
        broadcaster.clone(),
        source,
        MetricFamily::SystemStatus,
        Duration::from_millis(settings.sampler.system_period_ms),
    ));
    tokio::spawn(run_liveness_sweeper(
        broadcaster.clone(),
        Duration::from_secs(settings.broadcast.liveness_interval_secs),
    ));

    start_websocket_server(addr, broadcaster, collaborators).await;
}
