//! Star-schema definitions for the song-play warehouse.
//!
//! Table identifiers, staging column layouts and the `CREATE`/`DROP`
//! statements for both the Redshift (Postgres wire) and the local SQLite
//! backends.

pub use sea_orm_migration::prelude::*;
pub use sea_orm_migration::sea_orm::DatabaseBackend;

mod staging;
mod tables;

pub use staging::{ColumnKind, StagingColumn, STAGING_EVENTS_COLUMNS, STAGING_SONGS_COLUMNS};
pub use tables::{Artists, Songplays, Songs, Time, Users, WarehouseTable, CREATE_ORDER, DROP_ORDER};
