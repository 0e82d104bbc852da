//! Table catalog and `CREATE`/`DROP` statement builders.
//!
//! On the Postgres backend (Redshift) column attributes `DISTKEY`, `SORTKEY`
//! and `IDENTITY` are emitted together with primary and foreign keys. Redshift
//! never enforces those keys, so the SQLite rendering leaves them out to keep
//! the same duplicate-tolerant behavior.

use std::fmt;

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

use crate::staging::{ColumnKind, StagingColumn, STAGING_EVENTS_COLUMNS, STAGING_SONGS_COLUMNS};

/// Every table owned by the warehouse schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarehouseTable {
    StagingEvents,
    StagingSongs,
    Songplays,
    Users,
    Songs,
    Artists,
    Time,
}

/// Order in which tables are dropped: the fact table goes before the
/// dimensions it references.
pub const DROP_ORDER: [WarehouseTable; 7] = [
    WarehouseTable::StagingEvents,
    WarehouseTable::StagingSongs,
    WarehouseTable::Songplays,
    WarehouseTable::Users,
    WarehouseTable::Songs,
    WarehouseTable::Artists,
    WarehouseTable::Time,
];

/// Order in which tables are created: dimensions exist before `songplays`
/// declares its foreign keys.
pub const CREATE_ORDER: [WarehouseTable; 7] = [
    WarehouseTable::StagingSongs,
    WarehouseTable::StagingEvents,
    WarehouseTable::Users,
    WarehouseTable::Songs,
    WarehouseTable::Artists,
    WarehouseTable::Time,
    WarehouseTable::Songplays,
];

impl WarehouseTable {
    /// Unquoted table name as it appears in SQL.
    pub fn name(self) -> &'static str {
        match self {
            WarehouseTable::StagingEvents => "staging_events",
            WarehouseTable::StagingSongs => "staging_songs",
            WarehouseTable::Songplays => "songplays",
            WarehouseTable::Users => "users",
            WarehouseTable::Songs => "songs",
            WarehouseTable::Artists => "artists",
            WarehouseTable::Time => "time",
        }
    }

    pub fn is_staging(self) -> bool {
        matches!(
            self,
            WarehouseTable::StagingEvents | WarehouseTable::StagingSongs
        )
    }

    /// Column layout for staging tables, `None` for star-schema tables.
    pub fn staging_columns(self) -> Option<&'static [StagingColumn]> {
        match self {
            WarehouseTable::StagingEvents => Some(STAGING_EVENTS_COLUMNS),
            WarehouseTable::StagingSongs => Some(STAGING_SONGS_COLUMNS),
            _ => None,
        }
    }

    pub fn drop_statement(self) -> TableDropStatement {
        Table::drop()
            .table(Alias::new(self.name()))
            .if_exists()
            .to_owned()
    }

    pub fn create_statement(self, backend: DatabaseBackend) -> TableCreateStatement {
        let redshift = backend == DatabaseBackend::Postgres;
        match self {
            WarehouseTable::StagingEvents => staging_table(self.name(), STAGING_EVENTS_COLUMNS),
            WarehouseTable::StagingSongs => staging_table(self.name(), STAGING_SONGS_COLUMNS),
            WarehouseTable::Users => users_table(redshift),
            WarehouseTable::Songs => songs_table(redshift),
            WarehouseTable::Artists => artists_table(redshift),
            WarehouseTable::Time => time_table(redshift),
            WarehouseTable::Songplays => songplays_table(redshift),
        }
    }
}

impl fmt::Display for WarehouseTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(DeriveIden)]
pub enum Users {
    Table,
    UserId,
    FirstName,
    LastName,
    Gender,
    Level,
}

#[derive(DeriveIden)]
pub enum Songs {
    Table,
    SongId,
    Title,
    ArtistId,
    Year,
    Duration,
}

#[derive(DeriveIden)]
pub enum Artists {
    Table,
    ArtistId,
    Name,
    Location,
    Latitude,
    Longitude,
}

#[derive(DeriveIden)]
pub enum Time {
    Table,
    StartTime,
    Hour,
    Day,
    Week,
    Month,
    Year,
    Weekday,
}

#[derive(DeriveIden)]
pub enum Songplays {
    Table,
    SongplayId,
    StartTime,
    UserId,
    Level,
    SongId,
    ArtistId,
    SessionId,
    Location,
    UserAgent,
}

/// Appends a Redshift column attribute. Attributes must precede constraints
/// such as `NOT NULL`, so call this before adding them.
fn attribute<'a>(def: &'a mut ColumnDef, redshift: bool, attr: &str) -> &'a mut ColumnDef {
    if redshift {
        def.extra(attr.to_string())
    } else {
        def
    }
}

fn staging_table(name: &str, columns: &[StagingColumn]) -> TableCreateStatement {
    let mut table = Table::create();
    table.table(Alias::new(name));
    for column in columns {
        let mut def = ColumnDef::new(Alias::new(column.name));
        match column.kind {
            ColumnKind::Integer => def.integer(),
            ColumnKind::Float => def.double(),
            ColumnKind::Varchar => def.string(),
            ColumnKind::Timestamp => def.timestamp(),
        };
        table.col(&mut def);
    }
    table.to_owned()
}

fn users_table(redshift: bool) -> TableCreateStatement {
    let mut table = Table::create();
    table
        .table(Users::Table)
        .if_not_exists()
        .col(attribute(
            ColumnDef::new(Users::UserId).integer(),
            redshift,
            "DISTKEY",
        ))
        .col(ColumnDef::new(Users::FirstName).string())
        .col(ColumnDef::new(Users::LastName).string())
        .col(ColumnDef::new(Users::Gender).string())
        .col(ColumnDef::new(Users::Level).string());
    if redshift {
        table.primary_key(Index::create().col(Users::UserId));
    }
    table.to_owned()
}

fn songs_table(redshift: bool) -> TableCreateStatement {
    let mut table = Table::create();
    table
        .table(Songs::Table)
        .if_not_exists()
        .col(attribute(
            ColumnDef::new(Songs::SongId).string(),
            redshift,
            "SORTKEY",
        ))
        .col(ColumnDef::new(Songs::Title).string().not_null())
        .col(ColumnDef::new(Songs::ArtistId).string().not_null())
        .col(ColumnDef::new(Songs::Year).integer())
        .col(ColumnDef::new(Songs::Duration).double());
    if redshift {
        table.primary_key(Index::create().col(Songs::SongId));
    }
    table.to_owned()
}

fn artists_table(redshift: bool) -> TableCreateStatement {
    let mut table = Table::create();
    table
        .table(Artists::Table)
        .if_not_exists()
        .col(attribute(
            ColumnDef::new(Artists::ArtistId).string(),
            redshift,
            "SORTKEY",
        ))
        .col(ColumnDef::new(Artists::Name).string().not_null())
        .col(ColumnDef::new(Artists::Location).string())
        .col(ColumnDef::new(Artists::Latitude).double())
        .col(ColumnDef::new(Artists::Longitude).double());
    if redshift {
        table.primary_key(Index::create().col(Artists::ArtistId));
    }
    table.to_owned()
}

fn time_table(redshift: bool) -> TableCreateStatement {
    let mut table = Table::create();
    table
        .table(Time::Table)
        .if_not_exists()
        .col(attribute(
            ColumnDef::new(Time::StartTime).timestamp(),
            redshift,
            "SORTKEY",
        ))
        .col(ColumnDef::new(Time::Hour).integer().not_null())
        .col(ColumnDef::new(Time::Day).integer().not_null())
        .col(ColumnDef::new(Time::Week).integer().not_null())
        .col(ColumnDef::new(Time::Month).integer().not_null())
        .col(ColumnDef::new(Time::Year).integer().not_null())
        .col(ColumnDef::new(Time::Weekday).integer().not_null());
    if redshift {
        table.primary_key(Index::create().col(Time::StartTime));
    }
    table.to_owned()
}

fn songplays_table(redshift: bool) -> TableCreateStatement {
    let mut table = Table::create();
    table.table(Songplays::Table).if_not_exists();

    if redshift {
        table.col(ColumnDef::new(Songplays::SongplayId).integer().extra("IDENTITY(0,1)"));
    } else {
        table.col(
            ColumnDef::new(Songplays::SongplayId)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        );
    }

    table
        .col(attribute(
            ColumnDef::new(Songplays::StartTime).timestamp(),
            redshift,
            "SORTKEY",
        ))
        .col(attribute(
            ColumnDef::new(Songplays::UserId).integer(),
            redshift,
            "DISTKEY",
        ))
        .col(ColumnDef::new(Songplays::Level).string())
        .col(ColumnDef::new(Songplays::SongId).string())
        .col(ColumnDef::new(Songplays::ArtistId).string())
        .col(ColumnDef::new(Songplays::SessionId).integer().not_null())
        .col(ColumnDef::new(Songplays::Location).string())
        .col(ColumnDef::new(Songplays::UserAgent).string());

    if redshift {
        table
            .primary_key(Index::create().col(Songplays::SongplayId))
            .foreign_key(
                ForeignKey::create()
                    .name("fk_songplays_start_time")
                    .from(Songplays::Table, Songplays::StartTime)
                    .to(Time::Table, Time::StartTime),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_songplays_user_id")
                    .from(Songplays::Table, Songplays::UserId)
                    .to(Users::Table, Users::UserId),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_songplays_song_id")
                    .from(Songplays::Table, Songplays::SongId)
                    .to(Songs::Table, Songs::SongId),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_songplays_artist_id")
                    .from(Songplays::Table, Songplays::ArtistId)
                    .to(Artists::Table, Artists::ArtistId),
            );
    }
    table.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redshift_sql(table: WarehouseTable) -> String {
        table
            .create_statement(DatabaseBackend::Postgres)
            .to_string(PostgresQueryBuilder)
    }

    fn sqlite_sql(table: WarehouseTable) -> String {
        table
            .create_statement(DatabaseBackend::Sqlite)
            .to_string(SqliteQueryBuilder)
    }

    #[test]
    fn orders_cover_every_table_once() {
        for order in [DROP_ORDER, CREATE_ORDER] {
            let mut names: Vec<_> = order.iter().map(|t| t.name()).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), 7);
        }
        assert_eq!(CREATE_ORDER.last(), Some(&WarehouseTable::Songplays));
        assert_eq!(DROP_ORDER[2], WarehouseTable::Songplays);
    }

    #[test]
    fn redshift_users_carry_distkey_and_primary_key() {
        let sql = redshift_sql(WarehouseTable::Users);
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "users""#));
        assert!(sql.contains(r#""user_id" integer DISTKEY"#));
        assert!(sql.contains(r#"PRIMARY KEY ("user_id")"#));
    }

    #[test]
    fn redshift_songplays_has_identity_sortkey_and_foreign_keys() {
        let sql = redshift_sql(WarehouseTable::Songplays);
        assert!(sql.contains("IDENTITY(0,1)"));
        assert!(sql.contains(r#""start_time" timestamp without time zone SORTKEY"#));
        assert!(sql.contains(r#""user_id" integer DISTKEY"#));
        assert!(sql.contains(r#""session_id" integer NOT NULL"#));
        for target in [r#""time""#, r#""users""#, r#""songs""#, r#""artists""#] {
            assert!(sql.contains(&format!("REFERENCES {target}")), "missing FK to {target}");
        }
    }

    #[test]
    fn staging_tables_are_plain_creates() {
        let sql = redshift_sql(WarehouseTable::StagingEvents);
        assert!(sql.starts_with(r#"CREATE TABLE "staging_events""#));
        assert!(sql.contains(r#""firstName" varchar"#));
        assert!(!sql.contains("PRIMARY KEY"));
        assert!(!sql.contains("IF NOT EXISTS"));
    }

    #[test]
    fn sqlite_rendering_drops_redshift_attributes_and_keys() {
        for table in CREATE_ORDER {
            let sql = sqlite_sql(table);
            assert!(!sql.contains("DISTKEY"));
            assert!(!sql.contains("SORTKEY"));
            assert!(!sql.contains("REFERENCES"));
        }
        assert!(sqlite_sql(WarehouseTable::Songplays).contains("AUTOINCREMENT"));
        assert!(!sqlite_sql(WarehouseTable::Users).contains("PRIMARY KEY"));
    }

    #[test]
    fn drop_statements_are_guarded() {
        let sql = WarehouseTable::Time
            .drop_statement()
            .to_string(PostgresQueryBuilder);
        assert_eq!(sql, r#"DROP TABLE IF EXISTS "time""#);
    }
}
