//! Zenith Fixer: a one-shot Windows remediation tool for the Roblox client.
//!
//! The library holds every step and the orchestrator; `main.rs` is only the
//! console presentation layer.

pub mod elevation;
pub mod error;
pub mod fetch;
pub mod mirror;
pub mod names;
pub mod orchestrator;
pub mod paths;
pub mod runner;
pub mod scanner;
pub mod steps;
pub mod terminator;
pub mod watcher;

use std::time::Duration;

use log::warn;

/// Env var overriding how long the Downloads watcher waits, in seconds.
pub const WATCH_SECS_ENV: &str = "ZENITH_WATCH_SECS";

pub fn env_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => is_truthy(&v),
        Err(_) => false,
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Watcher deadline: `ZENITH_WATCH_SECS` if it parses to a positive number,
/// otherwise the default.
pub fn watch_wait() -> Duration {
    parse_watch_secs(std::env::var(WATCH_SECS_ENV).ok().as_deref())
}

fn parse_watch_secs(raw: Option<&str>) -> Duration {
    match raw.map(str::trim) {
        None | Some("") => steps::DEFAULT_WATCH_WAIT,
        Some(s) => match s.parse::<u64>() {
            Ok(n) if n > 0 => Duration::from_secs(n),
            _ => {
                warn!("ignoring invalid {}={:?}", WATCH_SECS_ENV, s);
                steps::DEFAULT_WATCH_WAIT
            }
        },
    }
}

/// Version line with the metadata exported by `build.rs`.
pub fn build_info() -> String {
    format!(
        "{} {} ({} {}, built {} for {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("GIT_DESCRIBE"),
        env!("GIT_COMMIT"),
        env!("BUILD_UNIX_TIME"),
        env!("BUILD_TARGET"),
    )
}
