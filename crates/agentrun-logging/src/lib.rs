//! # agentrun-logging
//!
//! Structured logging with `tracing`.
//!
//! - [`init_subscriber`] / [`init_json_subscriber`] install the process-wide
//!   stderr subscriber
//! - [`init_from_settings`] picks one from [`LoggingSettings`]
//! - [`capture_logs`] scopes an in-memory subscriber for tests
//!
//! `RUST_LOG` always wins over the configured level.

#![deny(unsafe_code)]

pub mod test_utils;

pub use agentrun_settings::{LogFormat, LoggingSettings};
pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the compact stderr subscriber. Later calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Install a JSON-lines stderr subscriber. Later calls are no-ops.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(true);

    let _ = subscriber.try_init();
}

/// Install the subscriber described by `settings`.
pub fn init_from_settings(settings: &LoggingSettings) {
    match settings.format {
        LogFormat::Compact => init_subscriber(&settings.level),
        LogFormat::Json => init_json_subscriber(&settings.level),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
