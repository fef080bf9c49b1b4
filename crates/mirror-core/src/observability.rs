//! Observability infrastructure for mirror.
//!
//! Structured logging with consistent spans. Refresh runs and their stages
//! each get a span so per-entity log lines can be attributed to the run and
//! commit that produced them.

use std::str::FromStr;
use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(Error::InvalidInput(format!(
                "unknown log format '{other}' (expected 'json' or 'pretty')"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// When `RUST_LOG` is unset the filter defaults to `info`, or `debug` when
/// `debug` is true.
///
/// # Example
///
/// ```rust
/// use mirror_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty, false);
/// ```
pub fn init_logging(format: LogFormat, debug: bool) {
    INIT.call_once(|| {
        let default_level = if debug { "debug" } else { "info" };
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

        // stdout carries command output.
        // A subscriber installed by an embedding process wins.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init(),
        };
    });
}

/// Creates the span wrapping one refresh run.
///
/// `commit` starts empty and is recorded once the source has been pulled.
///
/// ```rust
/// use mirror_core::observability::refresh_span;
///
/// let span = refresh_span("trigger", false);
/// span.record("commit", "4f2a9c1");
/// ```
#[must_use]
pub fn refresh_span(operation: &str, force: bool) -> Span {
    tracing::info_span!(
        "refresh",
        op = operation,
        force = force,
        commit = tracing::field::Empty,
    )
}

/// Creates a span for one reconciliation stage.
#[must_use]
pub fn stage_span(kind: &str) -> Span {
    tracing::info_span!("stage", kind = kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        // Should not panic (uses Once internally)
        init_logging(LogFormat::Pretty, false);
        init_logging(LogFormat::Json, true); // Second call should be no-op
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_refresh_span_records_commit() {
        let span = refresh_span("run_once", true);
        span.record("commit", "abc123");
        let _guard = span.enter();
        let stage = stage_span("resource");
        let _stage_guard = stage.enter();
        tracing::info!("message in stage span");
    }
}
