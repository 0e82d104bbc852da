//! # Error Handling
//!
//! Every pipeline stage returns its outcome as an [`EtlError`] to the
//! orchestrator, which decides whether the run continues.

use std::path::PathBuf;

use sea_orm::DbErr;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while connecting to the warehouse or running a stage.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to warehouse after {attempts} attempt(s): {source}")]
    Connect { attempts: u32, source: DbErr },

    #[error("statement '{step}' failed: {source}")]
    Statement { step: String, source: DbErr },

    #[error("failed to close warehouse session: {source}")]
    Cleanup { source: DbErr },

    #[error("unsupported database backend {backend}; expected Redshift (postgres) or SQLite")]
    UnsupportedBackend { backend: String },

    #[error("invalid copy parameter {name}: {reason}")]
    InvalidCopyParameter { name: &'static str, reason: String },

    #[error("failed to read source {path}: {source}")]
    SourceIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    SourceJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("value {value} in {path} cannot be stored in column {column}")]
    InvalidSourceValue {
        path: PathBuf,
        column: &'static str,
        value: String,
    },

    #[error("{} staging copy operation(s) failed: {}", .failures.len(), summarize(.failures))]
    StagingLoad { failures: Vec<CopyFailure> },
}

/// A failed copy job inside the staging load.
#[derive(Debug)]
pub struct CopyFailure {
    pub table: &'static str,
    pub error: Box<EtlError>,
}

fn summarize(failures: &[CopyFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{}: {}", failure.table, failure.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl EtlError {
    pub(crate) fn statement(step: impl Into<String>, source: DbErr) -> Self {
        EtlError::Statement {
            step: step.into(),
            source,
        }
    }

    pub(crate) fn copy_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        EtlError::InvalidCopyParameter {
            name,
            reason: reason.into(),
        }
    }
}
