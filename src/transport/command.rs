//! Privileged commands
//!
//! The `command` control message lets an authenticated dashboard session
//! drive a fixed set of cluster actions. The handler enforces the allow-list
//! and the authentication gate; actually performing the action is delegated
//! to a `CommandExecutor` collaborator so the fan-out core never shells out
//! or talks to the scheduler itself.

use tracing::info;

/// Actions a client is allowed to request at all. Anything else is rejected
/// before the executor is consulted.
pub const ALLOWED_ACTIONS: &[&str] = &["submit_job", "cancel_job", "set_fan_policy"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError(pub String);

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command failed: {}", self.0)
    }
}

impl std::error::Error for CommandError {}

/// Executes an allow-listed privileged action on behalf of a principal.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, CommandError>;
}

/// Default executor: records the request and acknowledges it. The real
/// scheduler integration lives outside this subsystem.
pub struct LoggingExecutor;

impl CommandExecutor for LoggingExecutor {
    fn execute(
        &self,
        action: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, CommandError> {
        info!("executing {action} with {params}");
        Ok(serde_json::json!({ "action": action, "accepted": true }))
    }
}

pub fn is_allowed(action: &str) -> bool {
    ALLOWED_ACTIONS.contains(&action)
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every executed action for assertions.
    #[derive(Default)]
    pub struct RecordingExecutor {
        pub calls: Mutex<Vec<String>>,
    }

    impl CommandExecutor for RecordingExecutor {
        fn execute(
            &self,
            action: &str,
            _params: &serde_json::Value,
        ) -> Result<serde_json::Value, CommandError> {
            self.calls.lock().unwrap().push(action.to_string());
            Ok(serde_json::json!({ "action": action, "accepted": true }))
        }
    }
}
