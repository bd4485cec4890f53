//! Log output for Smartmarks.
//!
//! Installs a `tracing-subscriber` formatter writing to stderr, so stdout
//! stays free for the RPC protocol.

use tracing::Level;

/// Installs the global subscriber at `level`.
///
/// Unknown levels fall back to `info`. Returns `false` if a subscriber was
/// already installed, which is harmless.
pub fn init(level: &str) -> bool {
    let level = parse_level(level);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}
