//! Shared utilities used across the application.

pub mod logging;
