//! Structured logging setup on top of `tracing`.
//!
//! The server emits structured events (`lobby_id`, `connection_id`,
//! `user_id`, ...) and leaves formatting to the subscriber installed here.
//! [`capture_logs`] installs an in-memory subscriber for assertions in tests.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Build the level filter: `RUST_LOG` wins, otherwise `level`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum level when `RUST_LOG` is unset (e.g. `"info"`).
/// * `json` - Emit one JSON object per line instead of compact text.
pub fn init_subscriber(level: &str, json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global subscriber is already set
    let _ = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.compact().try_init()
    };
}
