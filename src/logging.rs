//! Logging setup for the binaries.
//!
//! Standard output belongs to the identity lines, so every event goes to
//! standard error.

use crate::env::LOG_VAR;
use tracing::Level;

/// Level used when neither the caller nor `FERROGROUP_LOG` picks one.
pub const DEFAULT_LEVEL: Level = Level::WARN;

/// Parse a level name (`error`, `warn`, `info`, `debug`, `trace`).
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// Pick the level: explicit argument, then `FERROGROUP_LOG`, then the default.
pub fn resolve_level(explicit: Option<&str>) -> Level {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_VAR).ok())
        .and_then(|name| parse_level(&name))
        .unwrap_or(DEFAULT_LEVEL)
}

/// Install the global `tracing` subscriber.
///
/// Does nothing if a subscriber is already installed.
pub fn init(level: Level) {
    let installed = tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_level(true)
        .with_target(false)
        .with_max_level(level)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
