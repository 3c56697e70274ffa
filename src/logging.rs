//! # Structured Logging Module
//!
//! Environment-aware structured logging. The supervisor logs to the console
//! and to a JSON file under `log/`; worker processes log to stderr only,
//! since their stdout carries the message protocol.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_DIR: &str = "log";

/// Initialize console plus JSON file logging for the supervisor process
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(&log_level));

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_filename = format!("{environment}.{pid}.{timestamp}.log");
        let log_dir = PathBuf::from(LOG_DIR);

        match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                let _ = FILE_GUARD.set(guard);

                let file = fmt::layer()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new(&log_level));

                if tracing_subscriber::registry()
                    .with(console)
                    .with(file)
                    .try_init()
                    .is_err()
                {
                    tracing::debug!("Global tracing subscriber already initialized");
                }

                tracing::info!(
                    pid = pid,
                    environment = %environment,
                    log_file = %log_dir.join(&log_filename).display(),
                    "Structured logging initialized with file output"
                );
            }
            Err(e) => {
                if tracing_subscriber::registry().with(console).try_init().is_err() {
                    tracing::debug!("Global tracing subscriber already initialized");
                }
                tracing::warn!(
                    error = %e,
                    directory = %log_dir.display(),
                    "Could not create log directory, logging to console only"
                );
            }
        }
    });
}

/// Initialize stderr-only logging for a worker process
pub fn init_worker_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .json()
            .with_filter(EnvFilter::new(log_level));

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }
    });
}

/// Current environment from `PRICEFEED_ENV`, then `APP_ENV`
fn get_environment() -> String {
    environment_from(|name| std::env::var(name).ok())
}

fn environment_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("PRICEFEED_ENV")
        .or_else(|| lookup("APP_ENV"))
        .unwrap_or_else(|| "development".to_string())
}

/// Log filter for an environment; `RUST_LOG` wins when set
fn get_log_level(environment: &str) -> String {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        if !filter.trim().is_empty() {
            return filter;
        }
    }
    default_log_level(environment).to_string()
}

fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "test" => "warn",
        _ => "debug",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn test_environment_detection() {
        let both = [("PRICEFEED_ENV", "test_override"), ("APP_ENV", "production")];
        assert_eq!(environment_from(vars(&both)), "test_override");
        assert_eq!(environment_from(vars(&both[1..])), "production");
        assert_eq!(environment_from(vars(&[])), "development");
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(default_log_level("test"), "warn");
        assert_eq!(default_log_level("development"), "debug");
        assert_eq!(default_log_level("production"), "info");
        assert_eq!(default_log_level("unknown"), "debug");
    }
}
