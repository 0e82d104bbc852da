//! Warehouse session management and statement execution.
//!
//! A run holds exactly one connection. Statements are executed one at a time
//! in autocommit mode, so each statement commits on its own.

use std::fmt;
use std::time::Duration;

use metrics::counter;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::EtlError;

/// SQL flavour spoken by the connected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Amazon Redshift over the Postgres wire protocol.
    Redshift,
    /// Local SQLite database emulating the warehouse.
    Sqlite,
}

impl Dialect {
    pub fn from_backend(backend: DatabaseBackend) -> Result<Self, EtlError> {
        match backend {
            DatabaseBackend::Postgres => Ok(Dialect::Redshift),
            DatabaseBackend::Sqlite => Ok(Dialect::Sqlite),
            other => Err(EtlError::UnsupportedBackend {
                backend: format!("{other:?}"),
            }),
        }
    }

    pub fn of<C: ConnectionTrait>(db: &C) -> Result<Self, EtlError> {
        Self::from_backend(db.get_database_backend())
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Redshift => f.write_str("redshift"),
            Dialect::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// Opens a single-connection pool to the configured warehouse.
///
/// Connection attempts are retried with exponential backoff up to
/// `db_connect_attempts` times (one attempt by default).
pub async fn connect(cfg: &AppConfig) -> Result<DatabaseConnection, EtlError> {
    let url = cfg.connection_url()?;

    let mut opt = ConnectOptions::new(url);
    opt.max_connections(1)
        .min_connections(1)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let attempts = cfg.db_connect_attempts.max(1);
    let mut retry_delay = Duration::from_millis(250);

    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                info!(
                    attempt,
                    backend = ?conn.get_database_backend(),
                    "connected to warehouse"
                );
                return Ok(conn);
            }
            Err(source) if attempt >= attempts => {
                return Err(EtlError::Connect { attempts, source });
            }
            Err(e) => {
                warn!(
                    attempt,
                    error = %e,
                    "warehouse connection attempt failed, retrying in {:?}",
                    retry_delay
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Executes one unprepared statement and returns the number of affected rows.
pub async fn execute<C: ConnectionTrait>(db: &C, step: &str, sql: &str) -> Result<u64, EtlError> {
    debug!(step, sql, "executing statement");
    match db.execute_unprepared(sql).await {
        Ok(result) => {
            counter!("dwh_statements_total", "outcome" => "ok").increment(1);
            Ok(result.rows_affected())
        }
        Err(source) => {
            counter!("dwh_statements_total", "outcome" => "error").increment(1);
            Err(EtlError::statement(step, source))
        }
    }
}

/// Scoped warehouse session; [`Session::close`] releases the connection.
///
/// Dropping a session without closing it still releases the pool, but only
/// an explicit close reports cleanup failures.
pub struct Session {
    db: DatabaseConnection,
}

impl Session {
    pub async fn open(cfg: &AppConfig) -> Result<Self, EtlError> {
        let db = connect(cfg).await?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn close(self) -> Result<(), EtlError> {
        self.db
            .close()
            .await
            .map_err(|source| EtlError::Cleanup { source })
    }
}
