//! Staging loader.
//!
//! Copies the raw event logs and the song catalog into the two staging
//! tables. On Redshift this is the native bulk `COPY`; on the local SQLite
//! dialect the same options are emulated by reading JSON files from disk.

mod copy;
mod local;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use star_schema::WarehouseTable;
use tracing::{error, info, instrument};

use crate::config::AppConfig;
use crate::db::Dialect;
use crate::error::{CopyFailure, EtlError};
use crate::pipeline::StageSummary;

pub use copy::{CopyCredentials, RedshiftCopier};
pub use local::LocalJsonCopier;

/// Where a copy job reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Object-storage prefix exactly as configured, e.g. `s3://bucket/log_data`.
    S3(String),
    /// Local file or directory.
    Local(PathBuf),
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::S3(location) => f.write_str(location),
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// How JSON fields map onto staging columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonShape {
    /// Match object keys to the lowercased column names.
    Auto,
    /// Positional mapping read from a jsonpaths descriptor.
    Paths(SourceLocation),
}

/// One bulk-copy operation into a staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub table: WarehouseTable,
    pub source: SourceLocation,
    pub shape: JsonShape,
    /// Timestamps arrive as millisecond-epoch integers.
    pub epoch_millis: bool,
}

/// Performs a single copy job against the warehouse.
#[async_trait]
pub trait StagingCopier: Send + Sync {
    /// Returns the number of rows loaded, when the backend reports it.
    async fn copy(&self, db: &DatabaseConnection, job: &CopyJob) -> Result<u64, EtlError>;
}

/// A copy job, or the reason its parameters were rejected.
type PlannedJob = Result<CopyJob, CopyFailure>;

/// Runs the two staging copy jobs in sequence.
pub struct Loader {
    planned: Vec<PlannedJob>,
    copier: Box<dyn StagingCopier>,
}

impl Loader {
    /// Validates the copy parameters from `config` for the given dialect.
    ///
    /// Missing or malformed credentials fail the whole loader. A bad source
    /// or shape only rejects its own job; the other job still runs.
    pub fn from_config(config: &AppConfig, dialect: Dialect) -> Result<Self, EtlError> {
        let copier: Box<dyn StagingCopier> = match dialect {
            Dialect::Redshift => {
                let credentials = CopyCredentials::from_config(config)?;
                Box::new(RedshiftCopier::new(credentials))
            }
            Dialect::Sqlite => Box::new(LocalJsonCopier),
        };

        let events = plan_job(WarehouseTable::StagingEvents, dialect, || {
            Ok(CopyJob {
                table: WarehouseTable::StagingEvents,
                source: copy::parse_location(
                    "DWH_S3_LOG_DATA",
                    copy::required("DWH_S3_LOG_DATA", &config.s3.log_data)?,
                )?,
                shape: copy::parse_json_shape(copy::required(
                    "DWH_S3_LOG_JSON_PATH",
                    &config.s3.log_json_path,
                )?)?,
                epoch_millis: true,
            })
        });
        let songs = plan_job(WarehouseTable::StagingSongs, dialect, || {
            Ok(CopyJob {
                table: WarehouseTable::StagingSongs,
                source: copy::parse_location(
                    "DWH_S3_SONG_DATA",
                    copy::required("DWH_S3_SONG_DATA", &config.s3.song_data)?,
                )?,
                shape: JsonShape::Auto,
                epoch_millis: false,
            })
        });

        Ok(Self {
            planned: vec![events, songs],
            copier,
        })
    }

    pub fn with_copier(jobs: Vec<CopyJob>, copier: Box<dyn StagingCopier>) -> Self {
        Self {
            planned: jobs.into_iter().map(Ok).collect(),
            copier,
        }
    }

    /// Jobs whose parameters passed validation, in execution order.
    pub fn jobs(&self) -> impl Iterator<Item = &CopyJob> {
        self.planned.iter().filter_map(|planned| planned.as_ref().ok())
    }

    /// Runs every copy job. A failed or rejected job does not stop the next
    /// one; all failures are returned together.
    #[instrument(skip_all)]
    pub async fn load_staging(self, db: &DatabaseConnection) -> Result<StageSummary, EtlError> {
        let mut summary = StageSummary::default();
        let mut failures = Vec::new();

        for planned in self.planned {
            let job = match planned {
                Ok(job) => job,
                Err(rejected) => {
                    error!(
                        table = rejected.table,
                        error = %rejected.error,
                        "staging copy rejected"
                    );
                    failures.push(rejected);
                    continue;
                }
            };

            match self.copier.copy(db, &job).await {
                Ok(rows) => {
                    info!(
                        table = job.table.name(),
                        source = %job.source,
                        rows,
                        "loaded staging table"
                    );
                    summary.statements += 1;
                    summary.rows_affected += rows;
                }
                Err(err) => {
                    error!(
                        table = job.table.name(),
                        source = %job.source,
                        error = %err,
                        "staging copy failed"
                    );
                    failures.push(CopyFailure {
                        table: job.table.name(),
                        error: Box::new(err),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(EtlError::StagingLoad { failures })
        }
    }
}

fn plan_job(
    table: WarehouseTable,
    dialect: Dialect,
    build: impl FnOnce() -> Result<CopyJob, EtlError>,
) -> PlannedJob {
    build()
        .and_then(|job| copy::ensure_reachable(dialect, &job).map(|()| job))
        .map_err(|err| CopyFailure {
            table: table.name(),
            error: Box::new(err),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeoConfig, IamRoleConfig, S3Config};

    fn redshift_config() -> AppConfig {
        AppConfig {
            s3: S3Config {
                log_data: Some("'s3://udacity-dend/log_data'".to_string()),
                log_json_path: Some("'s3://udacity-dend/log_json_path.json'".to_string()),
                song_data: Some("'s3://udacity-dend/song_data'".to_string()),
            },
            iam_role: IamRoleConfig {
                arn: Some("arn:aws:iam::123456789012:role/dwhRole".to_string()),
            },
            geo: GeoConfig {
                region: Some("us-west-2".to_string()),
            },
            ..AppConfig::default()
        }
    }

    fn rejected(loader: &Loader) -> Vec<(&'static str, String)> {
        loader
            .planned
            .iter()
            .filter_map(|planned| planned.as_ref().err())
            .map(|failure| (failure.table, failure.error.to_string()))
            .collect()
    }

    #[test]
    fn builds_events_then_songs_jobs() {
        let loader = Loader::from_config(&redshift_config(), Dialect::Redshift).unwrap();
        let jobs: Vec<_> = loader.jobs().collect();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].table, WarehouseTable::StagingEvents);
        assert!(jobs[0].epoch_millis);
        assert!(matches!(jobs[0].shape, JsonShape::Paths(SourceLocation::S3(_))));
        assert_eq!(jobs[1].table, WarehouseTable::StagingSongs);
        assert_eq!(jobs[1].shape, JsonShape::Auto);
    }

    #[test]
    fn redshift_requires_role_and_region() {
        let mut config = redshift_config();
        config.iam_role.arn = None;
        let err = Loader::from_config(&config, Dialect::Redshift).err().unwrap();
        assert!(matches!(
            err,
            EtlError::InvalidCopyParameter {
                name: "DWH_IAM_ROLE_ARN",
                ..
            }
        ));
    }

    #[test]
    fn local_dialect_does_not_need_credentials() {
        let config = AppConfig {
            s3: S3Config {
                log_data: Some("/data/log_data".to_string()),
                log_json_path: Some("auto".to_string()),
                song_data: Some("file:///data/song_data".to_string()),
            },
            ..AppConfig::default()
        };
        let loader = Loader::from_config(&config, Dialect::Sqlite).unwrap();
        assert_eq!(
            loader.jobs().nth(1).map(|job| &job.source),
            Some(&SourceLocation::Local(PathBuf::from("/data/song_data")))
        );
    }

    #[test]
    fn a_bad_song_source_only_rejects_the_songs_job() {
        let mut config = redshift_config();
        config.s3.song_data = None;
        let loader = Loader::from_config(&config, Dialect::Redshift).unwrap();

        let jobs: Vec<_> = loader.jobs().collect();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].table, WarehouseTable::StagingEvents);

        let rejected = rejected(&loader);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "staging_songs");
        assert!(rejected[0].1.contains("DWH_S3_SONG_DATA"));
    }

    #[test]
    fn s3_sources_are_rejected_per_job_on_the_local_dialect() {
        let config = AppConfig {
            s3: S3Config {
                log_data: Some("/data/log_data".to_string()),
                log_json_path: Some("auto".to_string()),
                song_data: Some("s3://udacity-dend/song_data".to_string()),
            },
            ..AppConfig::default()
        };
        let loader = Loader::from_config(&config, Dialect::Sqlite).unwrap();
        assert_eq!(loader.jobs().count(), 1);
        assert_eq!(rejected(&loader)[0].0, "staging_songs");
    }
}
