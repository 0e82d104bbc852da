//! Stage orchestration.
//!
//! A run opens one warehouse session, executes its stages in order and
//! applies the configured [`FailurePolicy`] after each failed stage. The
//! session is closed on every exit path.

use std::fmt;
use std::time::{Duration, Instant};

use metrics::counter;
use sea_orm::DatabaseConnection;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AppConfig, FailurePolicy};
use crate::db::{Dialect, Session};
use crate::error::EtlError;
use crate::loader::Loader;
use crate::schema::WarehouseSchema;
use crate::transform::Transformer;

/// Work reported by a successful stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub statements: usize,
    pub rows_affected: u64,
}

/// One step of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DropTables,
    CreateTables,
    LoadStaging,
    Transform,
}

impl Stage {
    /// Stages of the `create_tables` entry point.
    pub const CREATE_TABLES: [Stage; 2] = [Stage::DropTables, Stage::CreateTables];
    /// Stages of the `etl` entry point.
    pub const ETL: [Stage; 2] = [Stage::LoadStaging, Stage::Transform];

    pub fn name(self) -> &'static str {
        match self {
            Stage::DropTables => "drop_tables",
            Stage::CreateTables => "create_tables",
            Stage::LoadStaging => "load_staging",
            Stage::Transform => "transform",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
pub enum StageOutcome {
    Succeeded(StageSummary),
    Failed(EtlError),
    /// Not attempted because an earlier stage failed under the abort policy,
    /// or no session could be opened.
    Skipped,
}

#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub elapsed: Duration,
}

/// Everything that happened during one run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub policy: FailurePolicy,
    pub stages: Vec<StageReport>,
    pub connection_error: Option<EtlError>,
    pub cleanup_error: Option<EtlError>,
}

impl RunReport {
    /// True when a session was opened and every stage succeeded. A cleanup
    /// failure alone does not fail the run.
    pub fn is_success(&self) -> bool {
        self.connection_error.is_none()
            && self
                .stages
                .iter()
                .all(|report| matches!(report.outcome, StageOutcome::Succeeded(_)))
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|report| matches!(report.outcome, StageOutcome::Failed(_)))
            .map(|report| report.stage)
            .collect()
    }

    pub fn skipped_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|report| matches!(report.outcome, StageOutcome::Skipped))
            .map(|report| report.stage)
            .collect()
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|report| report.stage == stage)
            .map(|report| &report.outcome)
    }

    pub fn log_summary(&self) {
        for report in &self.stages {
            match &report.outcome {
                StageOutcome::Succeeded(summary) => info!(
                    run_id = %self.run_id,
                    stage = %report.stage,
                    statements = summary.statements,
                    rows_affected = summary.rows_affected,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "stage succeeded"
                ),
                StageOutcome::Failed(err) => error!(
                    run_id = %self.run_id,
                    stage = %report.stage,
                    error = %err,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "stage failed"
                ),
                StageOutcome::Skipped => {
                    warn!(run_id = %self.run_id, stage = %report.stage, "stage skipped")
                }
            }
        }
        if let Some(err) = &self.cleanup_error {
            warn!(run_id = %self.run_id, error = %err, "session cleanup failed");
        }
        info!(
            run_id = %self.run_id,
            success = self.is_success(),
            failed = self.failed_stages().len(),
            skipped = self.skipped_stages().len(),
            "run finished"
        );
    }
}

/// Runs stages against an already open connection.
pub struct Pipeline<'a> {
    config: &'a AppConfig,
    db: &'a DatabaseConnection,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a AppConfig, db: &'a DatabaseConnection) -> Self {
        Self { config, db }
    }

    /// Executes `stages` in order. Under [`FailurePolicy::Continue`] a failed
    /// stage is logged and the next one still runs; under
    /// [`FailurePolicy::Abort`] the remaining stages are skipped.
    pub async fn run(&self, stages: &[Stage]) -> Vec<StageReport> {
        let policy = self.config.failure_policy;
        let mut reports = Vec::with_capacity(stages.len());
        let mut aborted = false;

        for &stage in stages {
            if aborted {
                reports.push(StageReport {
                    stage,
                    outcome: StageOutcome::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            let started = Instant::now();
            let result = self
                .run_stage(stage)
                .instrument(info_span!("stage", stage = stage.name()))
                .await;
            let elapsed = started.elapsed();

            let outcome = match result {
                Ok(summary) => {
                    counter!("dwh_stage_runs_total", "stage" => stage.name(), "outcome" => "ok")
                        .increment(1);
                    StageOutcome::Succeeded(summary)
                }
                Err(err) => {
                    counter!("dwh_stage_runs_total", "stage" => stage.name(), "outcome" => "error")
                        .increment(1);
                    error!(stage = %stage, error = %err, %policy, "stage failed");
                    if policy == FailurePolicy::Abort {
                        aborted = true;
                    }
                    StageOutcome::Failed(err)
                }
            };
            reports.push(StageReport {
                stage,
                outcome,
                elapsed,
            });
        }

        reports
    }

    async fn run_stage(&self, stage: Stage) -> Result<StageSummary, EtlError> {
        match stage {
            Stage::DropTables => WarehouseSchema::new().drop_all(self.db).await,
            Stage::CreateTables => WarehouseSchema::new().create_all(self.db).await,
            Stage::LoadStaging => {
                let loader = Loader::from_config(self.config, Dialect::of(self.db)?)?;
                loader.load_staging(self.db).await
            }
            Stage::Transform => {
                let transformer = Transformer::new(self.config.load_mode);
                let summary = transformer.populate_dimensions_and_fact(self.db).await?;
                match transformer.table_counts(self.db).await {
                    Ok(counts) => info!(
                        users = counts.users,
                        songs = counts.songs,
                        artists = counts.artists,
                        time = counts.time,
                        songplays = counts.songplays,
                        "star schema row counts"
                    ),
                    Err(err) => warn!(error = %err, "failed to count star schema rows"),
                }
                Ok(summary)
            }
        }
    }
}

/// Opens a session, runs `stages` and closes the session again.
pub async fn run(config: &AppConfig, stages: &[Stage]) -> RunReport {
    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id);

    async {
        let mut report = RunReport {
            run_id,
            policy: config.failure_policy,
            stages: Vec::with_capacity(stages.len()),
            connection_error: None,
            cleanup_error: None,
        };

        let session = match Session::open(config).await {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "could not open warehouse session");
                report.connection_error = Some(err);
                report.stages = stages
                    .iter()
                    .map(|&stage| StageReport {
                        stage,
                        outcome: StageOutcome::Skipped,
                        elapsed: Duration::ZERO,
                    })
                    .collect();
                return report;
            }
        };

        report.stages = Pipeline::new(config, session.connection()).run(stages).await;

        if let Err(err) = session.close().await {
            report.cleanup_error = Some(err);
        }
        report
    }
    .instrument(span)
    .await
}
