//! Transformer: derives the dimension and fact tables from staging data with
//! `INSERT ... SELECT` statements.

use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait, TransactionTrait};
use star_schema::WarehouseTable;
use tracing::{info, instrument};

use crate::config::LoadMode;
use crate::db::{self, Dialect};
use crate::error::EtlError;
use crate::models::{Artist, Song, Songplay, Time, User};
use crate::pipeline::StageSummary;

const INSERT_USERS: &str = "INSERT INTO users (user_id, first_name, last_name, gender, level)
SELECT DISTINCT se.userId, se.firstName, se.lastName, se.gender, se.level
FROM staging_events se
WHERE se.userId IS NOT NULL;";

const INSERT_SONGS: &str = "INSERT INTO songs (song_id, title, artist_id, year, duration)
SELECT DISTINCT ss.song_id, ss.title, ss.artist_id, ss.year, ss.duration
FROM staging_songs ss
WHERE ss.song_id IS NOT NULL;";

const INSERT_ARTISTS: &str = "INSERT INTO artists (artist_id, name, location, latitude, longitude)
SELECT DISTINCT ss.artist_id, ss.artist_name, ss.artist_location, ss.artist_latitude, ss.artist_longitude
FROM staging_songs ss
WHERE ss.artist_id IS NOT NULL;";

const INSERT_TIME_REDSHIFT: &str = "INSERT INTO \"time\" (start_time, hour, day, week, month, year, weekday)
SELECT DISTINCT se.ts,
       EXTRACT(hour FROM se.ts),
       EXTRACT(day FROM se.ts),
       EXTRACT(week FROM se.ts),
       EXTRACT(month FROM se.ts),
       EXTRACT(year FROM se.ts),
       EXTRACT(weekday FROM se.ts)
FROM staging_events se
WHERE se.page = 'NextSong';";

// ISO week: day-of-year of the Thursday in the same Monday-based week.
const INSERT_TIME_SQLITE: &str = "INSERT INTO \"time\" (start_time, hour, day, week, month, year, weekday)
SELECT DISTINCT se.ts,
       CAST(strftime('%H', se.ts) AS INTEGER),
       CAST(strftime('%d', se.ts) AS INTEGER),
       (CAST(strftime('%j', date(se.ts, '-3 days', 'weekday 4')) AS INTEGER) - 1) / 7 + 1,
       CAST(strftime('%m', se.ts) AS INTEGER),
       CAST(strftime('%Y', se.ts) AS INTEGER),
       CAST(strftime('%w', se.ts) AS INTEGER)
FROM staging_events se
WHERE se.page = 'NextSong';";

const INSERT_SONGPLAYS: &str = "INSERT INTO songplays (start_time, user_id, level, song_id, artist_id, session_id, location, user_agent)
SELECT DISTINCT se.ts, se.userId, se.level, ss.song_id, ss.artist_id, se.sessionId, se.location, se.userAgent
FROM staging_events se
JOIN staging_songs ss ON se.song = ss.title AND se.artist = ss.artist_name
WHERE se.page = 'NextSong';";

const REPLACE_USERS: &str = "DELETE FROM users
WHERE user_id IN (SELECT se.userId FROM staging_events se WHERE se.userId IS NOT NULL);";

const REPLACE_SONGS: &str = "DELETE FROM songs
WHERE song_id IN (SELECT ss.song_id FROM staging_songs ss WHERE ss.song_id IS NOT NULL);";

const REPLACE_ARTISTS: &str = "DELETE FROM artists
WHERE artist_id IN (SELECT ss.artist_id FROM staging_songs ss WHERE ss.artist_id IS NOT NULL);";

const REPLACE_TIME: &str = "DELETE FROM \"time\"
WHERE start_time IN (SELECT se.ts FROM staging_events se WHERE se.page = 'NextSong');";

// Anonymous plays have a NULL user_id; two NULLs must match as the same key.
const REPLACE_SONGPLAYS_REDSHIFT: &str = "DELETE FROM songplays
USING staging_events se
WHERE se.page = 'NextSong'
  AND songplays.start_time = se.ts
  AND (songplays.user_id = se.userId OR (songplays.user_id IS NULL AND se.userId IS NULL))
  AND songplays.session_id = se.sessionId;";

const REPLACE_SONGPLAYS_SQLITE: &str = "DELETE FROM songplays
WHERE EXISTS (
    SELECT 1 FROM staging_events se
    WHERE se.page = 'NextSong'
      AND se.ts = songplays.start_time
      AND se.userId IS songplays.user_id
      AND se.sessionId = songplays.session_id
);";

/// The statements that populate one target table.
#[derive(Debug, Clone, Copy)]
struct TransformStep {
    table: WarehouseTable,
    insert: &'static str,
    /// Removes rows whose natural key is about to be inserted again.
    replace: &'static str,
}

fn steps(dialect: Dialect) -> [TransformStep; 5] {
    let (insert_time, replace_songplays) = match dialect {
        Dialect::Redshift => (INSERT_TIME_REDSHIFT, REPLACE_SONGPLAYS_REDSHIFT),
        Dialect::Sqlite => (INSERT_TIME_SQLITE, REPLACE_SONGPLAYS_SQLITE),
    };
    [
        TransformStep {
            table: WarehouseTable::Users,
            insert: INSERT_USERS,
            replace: REPLACE_USERS,
        },
        TransformStep {
            table: WarehouseTable::Songs,
            insert: INSERT_SONGS,
            replace: REPLACE_SONGS,
        },
        TransformStep {
            table: WarehouseTable::Artists,
            insert: INSERT_ARTISTS,
            replace: REPLACE_ARTISTS,
        },
        TransformStep {
            table: WarehouseTable::Time,
            insert: insert_time,
            replace: REPLACE_TIME,
        },
        TransformStep {
            table: WarehouseTable::Songplays,
            insert: INSERT_SONGPLAYS,
            replace: replace_songplays,
        },
    ]
}

fn clear_statement(dialect: Dialect, table: WarehouseTable) -> String {
    match dialect {
        Dialect::Redshift => format!("TRUNCATE \"{}\";", table.name()),
        Dialect::Sqlite => format!("DELETE FROM \"{}\";", table.name()),
    }
}

/// Row counts of the star-schema tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub users: u64,
    pub songs: u64,
    pub artists: u64,
    pub time: u64,
    pub songplays: u64,
}

/// Runs the five dimension and fact inserts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer {
    mode: LoadMode,
}

impl Transformer {
    pub fn new(mode: LoadMode) -> Self {
        Self { mode }
    }

    /// Populates users, songs, artists, time and songplays, in that order.
    /// The first failing statement stops the batch.
    #[instrument(skip_all, fields(mode = %self.mode))]
    pub async fn populate_dimensions_and_fact(
        &self,
        db: &DatabaseConnection,
    ) -> Result<StageSummary, EtlError> {
        let dialect = Dialect::of(db)?;
        let mut summary = StageSummary::default();

        for step in steps(dialect) {
            let table = step.table;
            let insert_step = format!("insert {table}");
            let rows = match self.mode {
                LoadMode::Append => db::execute(db, &insert_step, step.insert).await?,
                LoadMode::Truncate => {
                    db::execute(db, &format!("clear {table}"), &clear_statement(dialect, table))
                        .await?;
                    summary.statements += 1;
                    db::execute(db, &insert_step, step.insert).await?
                }
                LoadMode::Upsert => {
                    let txn = db
                        .begin()
                        .await
                        .map_err(|source| EtlError::statement(format!("begin {table}"), source))?;
                    let replaced =
                        db::execute(&txn, &format!("replace {table}"), step.replace).await?;
                    let rows = db::execute(&txn, &insert_step, step.insert).await?;
                    txn.commit()
                        .await
                        .map_err(|source| EtlError::statement(format!("commit {table}"), source))?;
                    info!(table = table.name(), replaced, "replaced existing rows");
                    summary.statements += 1;
                    rows
                }
            };
            info!(table = table.name(), rows, "populated table");
            summary.statements += 1;
            summary.rows_affected += rows;
        }

        Ok(summary)
    }

    /// Counts the rows currently held by each star-schema table.
    pub async fn table_counts(&self, db: &DatabaseConnection) -> Result<TableCounts, EtlError> {
        let count = |table: &str, source| EtlError::statement(format!("count {table}"), source);
        Ok(TableCounts {
            users: User::find().count(db).await.map_err(|e| count("users", e))?,
            songs: Song::find().count(db).await.map_err(|e| count("songs", e))?,
            artists: Artist::find().count(db).await.map_err(|e| count("artists", e))?,
            time: Time::find().count(db).await.map_err(|e| count("time", e))?,
            songplays: Songplay::find()
                .count(db)
                .await
                .map_err(|e| count("songplays", e))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_run_dimensions_before_the_fact() {
        let order: Vec<_> = steps(Dialect::Redshift).iter().map(|s| s.table).collect();
        assert_eq!(
            order,
            vec![
                WarehouseTable::Users,
                WarehouseTable::Songs,
                WarehouseTable::Artists,
                WarehouseTable::Time,
                WarehouseTable::Songplays,
            ]
        );
    }

    #[test]
    fn redshift_time_uses_extract() {
        let time = steps(Dialect::Redshift)[3];
        assert!(time.insert.contains("EXTRACT(week FROM se.ts)"));
        assert!(time.insert.contains("EXTRACT(weekday FROM se.ts)"));
        assert!(!steps(Dialect::Sqlite)[3].insert.contains("EXTRACT"));
    }

    #[test]
    fn songplays_join_on_exact_title_and_artist() {
        let songplays = steps(Dialect::Sqlite)[4];
        assert!(
            songplays
                .insert
                .contains("ON se.song = ss.title AND se.artist = ss.artist_name")
        );
        assert!(songplays.insert.contains("WHERE se.page = 'NextSong'"));
    }

    #[test]
    fn songplays_replace_matches_null_users() {
        assert!(
            steps(Dialect::Redshift)[4]
                .replace
                .contains("(songplays.user_id IS NULL AND se.userId IS NULL)")
        );
        assert!(
            steps(Dialect::Sqlite)[4]
                .replace
                .contains("se.userId IS songplays.user_id")
        );
    }

    #[test]
    fn truncate_is_dialect_specific() {
        assert_eq!(
            clear_statement(Dialect::Redshift, WarehouseTable::Time),
            "TRUNCATE \"time\";"
        );
        assert_eq!(
            clear_statement(Dialect::Sqlite, WarehouseTable::Users),
            "DELETE FROM \"users\";"
        );
    }
}
