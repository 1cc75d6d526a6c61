//! # Sparkmon
//!
//! `sparkmon` is the real-time telemetry backbone of a small GPU cluster
//! dashboard. It samples per-node GPU and system metrics on fixed periods
//! and fans them out over WebSockets to connected browser clients, each with
//! its own topic/node subscription filter, liveness tracking and
//! authentication gate.
//!
//! ## Core Modules
//!
//! - `broadcast`: the fan-out engine — connection registry, topic/node
//!   filtered delivery, liveness sweep and stats.
//! - `transport`: the WebSocket server and the per-connection control
//!   protocol (subscribe/unsubscribe/authenticate/ping/command).
//! - `client`: the dashboard-side connection manager — reconnect with
//!   exponential backoff, automatic resubscription and typed dispatch of
//!   inbound telemetry.
//! - `sampler`: timers that pull metric sources and publish one envelope per
//!   node per tick.
//! - `config`: layered server configuration.
//! - `utils`: logging setup and shared helpers.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod sampler;
pub mod transport;
pub mod utils;
