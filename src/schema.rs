//! Schema manager: drops and recreates the seven warehouse tables.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr};
use sea_orm_migration::SchemaManager;
use star_schema::{CREATE_ORDER, DROP_ORDER, WarehouseTable};
use tracing::{info, instrument};

use crate::error::EtlError;
use crate::pipeline::StageSummary;

/// Issues the `DROP`/`CREATE` batches for the star schema.
///
/// Each statement commits on its own; the first failure stops the remaining
/// statements of the batch and is returned to the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct WarehouseSchema;

impl WarehouseSchema {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all)]
    pub async fn drop_all(&self, db: &DatabaseConnection) -> Result<StageSummary, EtlError> {
        let manager = SchemaManager::new(db);
        let mut summary = StageSummary::default();
        for table in DROP_ORDER {
            manager
                .drop_table(table.drop_statement())
                .await
                .map_err(|source| EtlError::statement(format!("drop {table}"), source))?;
            info!(table = table.name(), "dropped table");
            summary.statements += 1;
        }
        Ok(summary)
    }

    #[instrument(skip_all)]
    pub async fn create_all(&self, db: &DatabaseConnection) -> Result<StageSummary, EtlError> {
        let backend = db.get_database_backend();
        let manager = SchemaManager::new(db);
        let mut summary = StageSummary::default();
        for table in CREATE_ORDER {
            manager
                .create_table(table.create_statement(backend))
                .await
                .map_err(|source| EtlError::statement(format!("create {table}"), source))?;
            info!(table = table.name(), "created table");
            summary.statements += 1;
        }
        Ok(summary)
    }

    /// Lists which of the seven tables currently exist.
    pub async fn existing_tables(
        &self,
        db: &DatabaseConnection,
    ) -> Result<Vec<WarehouseTable>, DbErr> {
        let manager = SchemaManager::new(db);
        let mut present = Vec::new();
        for table in CREATE_ORDER {
            if manager.has_table(table.name()).await? {
                present.push(table);
            }
        }
        Ok(present)
    }
}
