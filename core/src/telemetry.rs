use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::lock::{Lock, LockObserver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

static LOG_FORMAT: OnceLock<LogFormat> = OnceLock::new();

pub fn log_format() -> LogFormat {
    *LOG_FORMAT.get_or_init(|| {
        let value = env::var("FENCEQ_LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
        parse_log_format(&value)
    })
}

fn parse_log_format(value: &str) -> LogFormat {
    match value.trim().to_lowercase().as_str() {
        "pretty" | "text" | "human" => LogFormat::Pretty,
        _ => LogFormat::Json,
    }
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_format() {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_current_span(true)
                .with_filter(filter);
            tracing_subscriber::registry().with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_filter(filter);
            tracing_subscriber::registry().with(fmt_layer).init();
        }
    }
}

/// Lock observer that logs every lifecycle transition with the fencing
/// token, for diagnosing contention and renewal behavior in running
/// deployments. Enabled via `instrument_locks`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLockObserver;

impl LockObserver for TracingLockObserver {
    fn on_acquire_attempt(&self, resources: &[String], ttl: Duration) {
        tracing::debug!(
            resources = ?resources,
            ttl_ms = ttl.as_millis() as u64,
            "lock acquire attempt"
        );
    }

    fn on_acquired(&self, lock: &Lock) {
        tracing::info!(
            resources = ?lock.resources,
            token = %lock.token,
            validity_ms = lock.remaining().as_millis() as u64,
            "lock acquired"
        );
    }

    fn on_extended(&self, lock: &Lock) {
        tracing::debug!(
            resources = ?lock.resources,
            token = %lock.token,
            validity_ms = lock.remaining().as_millis() as u64,
            "lock extended"
        );
    }

    fn on_released(&self, lock: &Lock, released: bool) {
        tracing::info!(
            resources = ?lock.resources,
            token = %lock.token,
            released,
            "lock released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_format_handles_pretty_values() {
        assert_eq!(parse_log_format("pretty"), LogFormat::Pretty);
        assert_eq!(parse_log_format("text"), LogFormat::Pretty);
        assert_eq!(parse_log_format("human"), LogFormat::Pretty);
        assert_eq!(parse_log_format("PRETTY"), LogFormat::Pretty);
    }

    #[test]
    fn parse_log_format_defaults_to_json() {
        assert_eq!(parse_log_format("json"), LogFormat::Json);
        assert_eq!(parse_log_format(""), LogFormat::Json);
        assert_eq!(parse_log_format("nope"), LogFormat::Json);
    }
}
