//! Tracing setup for the session client
//!
//! One `tracing-subscriber` registry per process: an env filter plus a single
//! fmt layer writing json, pretty or compact lines to stderr or a file.

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// `[logging]` section of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Source file and line on every event
    pub include_location: bool,
    /// Thread ids and names on every event
    pub include_thread: bool,
    pub include_timestamp: bool,
    /// Log file path; stderr when absent
    pub log_file_path: Option<String>,
    /// Emit span close events with their duration
    pub log_span_timings: bool,
    /// Extra `target=level` directives layered over the base level
    pub filter_directives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            include_thread: false,
            include_timestamp: true,
            log_file_path: None,
            log_span_timings: false,
            filter_directives: vec![
                "erp_session=debug".to_string(),
                "erp_client=info".to_string(),
            ],
        }
    }
}

/// Install the global subscriber
///
/// Errors when a directive does not parse, the log file cannot be opened, or
/// a subscriber is already installed.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for directive in &config.filter_directives {
        filter = filter.add_directive(directive.parse()?);
    }

    let writer = match &config.log_file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config, writer))
        .try_init()?;

    Ok(())
}

fn fmt_layer<S>(config: &LoggingConfig, writer: BoxMakeWriter) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_span_events(if config.log_span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread)
        .with_thread_names(config.include_thread);

    match (config.format, config.include_timestamp) {
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
    }
}

/// Debug event marking the start of a session operation
#[macro_export]
macro_rules! log_operation_start {
    ($operation:expr) => {
        $crate::tracing::debug!(
            operation = $operation,
            "Session operation started"
        );
    };
    ($operation:expr, $($field:tt)*) => {
        $crate::tracing::debug!(
            operation = $operation,
            $($field)*,
            "Session operation started"
        );
    };
}

/// Info event for a completed session operation
#[macro_export]
macro_rules! log_operation_success {
    ($operation:expr) => {
        $crate::tracing::info!(
            operation = $operation,
            "Session operation succeeded"
        );
    };
    ($operation:expr, $($field:tt)*) => {
        $crate::tracing::info!(
            operation = $operation,
            $($field)*,
            "Session operation succeeded"
        );
    };
}

/// Warn event for a failed operation; `$error` must be a `SessionError`
#[macro_export]
macro_rules! log_operation_error {
    ($operation:expr, $error:expr) => {
        $crate::tracing::warn!(
            operation = $operation,
            error = %$error,
            http_status = ?$error.status(),
            "Session operation failed"
        );
    };
    ($operation:expr, $error:expr, $($field:tt)*) => {
        $crate::tracing::warn!(
            operation = $operation,
            error = %$error,
            http_status = ?$error.status(),
            $($field)*,
            "Session operation failed"
        );
    };
}
