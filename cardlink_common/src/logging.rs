//! Tracing subscriber bootstrap.
//!
//! Library code only emits `tracing` events; applications call
//! [`init_tracing`] once to install a formatter.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` directives take precedence over `level`. Returns `false` if a
/// global subscriber was already installed.
pub fn init_tracing(level: LogLevel, json: bool) -> bool {
    let level: tracing::Level = level.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    }
}
