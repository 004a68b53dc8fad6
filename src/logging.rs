//! Console logging for hosts and tests.

use tracing::Level;

/// Installs a `tracing-subscriber` fmt subscriber at `level`.
///
/// Does nothing if a global subscriber is already set, so tests can call
/// it freely.
pub fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}
