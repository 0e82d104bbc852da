//! Shared entry point of the `create_tables` and `etl` binaries.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info};

use crate::config::{ConfigLoader, FailurePolicy};
use crate::pipeline::{self, Stage};
use crate::telemetry::init_tracing;

/// Command-line flags accepted by both binaries.
#[derive(Parser, Debug, Default)]
#[command(version, about = "Star-schema ETL driver for Amazon Redshift")]
pub struct CliArgs {
    /// Stop at the first failed stage and exit non-zero (same as
    /// DWH_FAILURE_POLICY=abort).
    #[arg(long)]
    pub strict: bool,

    /// Directory holding the `.env` files.
    #[arg(long, value_name = "DIR", env = "DWH_ENV_DIR")]
    pub env_dir: Option<PathBuf>,
}

/// Loads configuration, runs `stages` and turns the run report into an exit
/// status.
///
/// Under the continue policy a failed stage is only logged; the process still
/// succeeds. Failing to open the warehouse session is always an error.
pub async fn run(stages: &[Stage], args: CliArgs) -> Result<()> {
    let loader = match args.env_dir {
        Some(dir) => ConfigLoader::with_base_dir(dir),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().context("loading configuration")?;
    if args.strict {
        config.failure_policy = FailurePolicy::Abort;
    }

    init_tracing(&config).context("initializing tracing")?;
    info!(
        profile = %config.profile,
        policy = %config.failure_policy,
        load_mode = %config.load_mode,
        "loaded configuration"
    );
    if let Ok(redacted) = config.redacted_json() {
        debug!(config = %redacted, "effective configuration");
    }

    let mut report = pipeline::run(&config, stages).await;
    report.log_summary();

    if let Some(err) = report.connection_error.take() {
        return Err(err).context("opening warehouse session");
    }

    let failed = report.failed_stages();
    if config.failure_policy == FailurePolicy::Abort && !failed.is_empty() {
        let names: Vec<_> = failed.iter().map(|stage| stage.name()).collect();
        bail!("run {} failed at stage(s): {}", report.run_id, names.join(", "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = CliArgs::try_parse_from(["etl", "--strict", "--env-dir", "/etc/dwh"]).unwrap();
        assert!(args.strict);
        assert_eq!(args.env_dir, Some(PathBuf::from("/etc/dwh")));

        let args = CliArgs::try_parse_from(["create_tables"]).unwrap();
        assert!(!args.strict);
    }
}
