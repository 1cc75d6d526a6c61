use std::str::FromStr;

use crate::config::LogSettings;

/// Sets up the tracing subscriber from the `[log]` section of the
/// configuration.
///
/// An unrecognized level falls back to `info` with a warning on stderr, so a
/// typo in the config file never leaves the process silent. Safe to call
/// more than once (tests re-initialize freely); only the first call wins.
pub fn init(settings: &LogSettings) {
    let level = match tracing::Level::from_str(&settings.level) {
        Ok(level) => level,
        Err(_) => {
            eprintln!(
                "unrecognized log level '{}', falling back to info",
                settings.level
            );
            tracing::Level::INFO
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
