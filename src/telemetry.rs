//! Logging setup for terminal applications embedding the engine.

use tracing::Level;

/// Installs a formatting subscriber at `level`.
///
/// Returns `false` if a global subscriber was already installed, which
/// makes the call safe to repeat from tests.
pub fn init_tracing(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}
