//! The `client` module is the dashboard-side counterpart of the transport:
//! a connection manager that keeps one logical connection alive across
//! network failures, and the typed state containers inbound telemetry is
//! dispatched into.

pub mod dispatch;
pub mod manager;

pub use dispatch::TelemetryState;
pub use manager::{ConnectionManager, ConnectionPhase, ManagerSettings};
