//! Tracing subscriber setup for a process embedding the operator core
//!
//! Every pass runs inside the `reconcile_at` span, so the formatters keep
//! span fields (namespace, cluster name) on each line.

use crate::{
    config::LoggingConfig,
    error::{OperatorError, Result},
};
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format selected by `LoggingConfig::format`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
    Full,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Full,
        }
    }
}

/// Filter directive for `config`: other crates at `warn`, this one at the
/// configured level.
pub fn filter_directive(config: &LoggingConfig) -> String {
    format!("warn,rust_quorum_ops={}", normalize_level(&config.level))
}

/// Install the global subscriber. `RUST_LOG`, when set, overrides the
/// configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));
    let format = LogFormat::parse(&config.format);

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .with_span_events(FmtSpan::CLOSE)
            .pretty()
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .compact()
            .boxed(),
        LogFormat::Full => fmt::layer()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| OperatorError::ConfigError(format!("logging already initialized: {}", e)))?;

    info!(level = %config.level, format = ?format, "Operator logging initialized");
    Ok(())
}

fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}
