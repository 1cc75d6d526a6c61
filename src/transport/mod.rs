//! The `transport` module handles network communication with dashboard
//! clients over WebSockets.
//!
//! It defines the control-message protocol, the per-connection handler that
//! applies those messages to broadcaster state, and the collaborator traits
//! (token validation, privileged command execution) the handler consults.

pub mod auth;
pub mod command;
pub mod message;
pub mod websocket;

pub use websocket::{Collaborators, start_websocket_server};

#[cfg(test)]
mod tests;
