//! Process-wide logging for the ETL binaries.
//!
//! Records emitted inside a pipeline run carry the `run` and `stage` span
//! fields, so JSON output can be grouped by run id and stage.

use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    EnvFilter, Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// sqlx echoes every executed statement under this target.
const SQLX_QUERY_TARGET: &str = "sqlx::query";

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid log filter {directives:?}: {source}")]
    Filter {
        directives: String,
        #[source]
        source: ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global subscriber once per process. Later calls are no-ops.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    let env_filter = match build_filter(config) {
        Ok(filter) => filter,
        Err(err) => {
            TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(err);
        }
    };

    // sqlx reports through `log`; an already installed logger keeps them.
    let _ = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(output_layer(&config.log_format, std::io::stderr))
        .try_init()
        .map_err(|err| {
            TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
            TelemetryInitError::from(err)
        })
}

/// Level filter from `RUST_LOG` when set, otherwise from `DWH_LOG_LEVEL`.
fn build_filter(config: &AppConfig) -> Result<EnvFilter, TelemetryInitError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    parse_filter(filter_directives(rust_log.as_deref(), &config.log_level))
}

/// Statement echo from sqlx stays at `warn` unless a directive names sqlx.
fn filter_directives(rust_log: Option<&str>, log_level: &str) -> String {
    let base = rust_log
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(log_level.trim());

    let quiet_sqlx = format!("{SQLX_QUERY_TARGET}=warn");
    let mut directives: Vec<&str> = base.split(',').filter(|d| !d.trim().is_empty()).collect();
    if !directives.iter().any(|d| d.contains("sqlx")) {
        directives.push(&quiet_sqlx);
    }
    directives.join(",")
}

fn parse_filter(directives: String) -> Result<EnvFilter, TelemetryInitError> {
    EnvFilter::try_new(&directives).map_err(|source| TelemetryInitError::Filter { directives, source })
}

fn output_layer<S, W>(format: &str, writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        "pretty" => fmt::layer().pretty().with_writer(writer).boxed(),
        _ => fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(true)
            .with_writer(writer)
            .boxed(),
    }
}
