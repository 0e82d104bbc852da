//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! carrying the warehouse schema, plus helpers for staging fixtures.

#![allow(dead_code)]

use anyhow::Result;
use dwh::config::AppConfig;
use dwh::schema::WarehouseSchema;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement, Value};

/// Positional jsonpaths descriptor for the event logs, one path per
/// `staging_events` column.
pub const EVENT_JSONPATHS: &str = r#"{
    "jsonpaths": [
        "$['artist']", "$['auth']", "$['firstName']", "$['gender']",
        "$['itemInSession']", "$['lastName']", "$['length']", "$['level']",
        "$['location']", "$['method']", "$['page']", "$['registration']",
        "$['sessionId']", "$['song']", "$['status']", "$['ts']",
        "$['userAgent']", "$.userId"
    ]
}"#;

/// Writes [`EVENT_JSONPATHS`] into `dir` and returns its path.
pub fn write_jsonpaths(dir: &std::path::Path) -> Result<String> {
    let path = dir.join("log_json_path.json");
    std::fs::write(&path, EVENT_JSONPATHS)?;
    Ok(path.display().to_string())
}

/// Sets up an in-memory SQLite database with all seven tables created.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    WarehouseSchema::new().create_all(&db).await?;
    Ok(db)
}

/// Config pointing at a file-backed SQLite database inside `dir`.
pub fn sqlite_config(dir: &std::path::Path) -> AppConfig {
    AppConfig {
        database_url: Some(format!("sqlite://{}?mode=rwc", dir.join("dwh.db").display())),
        ..AppConfig::default()
    }
}

/// A `NextSong` (or other page) event for `staging_events`.
#[derive(Debug, Clone)]
pub struct Event {
    pub user_id: Option<i32>,
    pub first_name: &'static str,
    pub last_name: &'static str,
    pub gender: &'static str,
    pub level: &'static str,
    pub song: &'static str,
    pub artist: &'static str,
    pub page: &'static str,
    pub session_id: i32,
    pub ts: &'static str,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            user_id: Some(7),
            first_name: "Adelyn",
            last_name: "Jordan",
            gender: "F",
            level: "free",
            song: "Test Song",
            artist: "Test Artist",
            page: "NextSong",
            session_id: 1,
            ts: "2018-11-01 12:00:00.000",
        }
    }
}

/// Inserts one row into `staging_events`.
pub async fn insert_event(db: &DatabaseConnection, event: &Event) -> Result<()> {
    let stmt = Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"INSERT INTO staging_events
            (artist, firstName, gender, itemInSession, lastName, length, level, location,
             page, sessionId, song, ts, userAgent, userId)
           VALUES (?, ?, ?, 0, ?, 200.5, ?, 'Phoenix, AZ', ?, ?, ?, ?, 'Mozilla/5.0', ?)"#,
        [
            Value::from(event.artist),
            Value::from(event.first_name),
            Value::from(event.gender),
            Value::from(event.last_name),
            Value::from(event.level),
            Value::from(event.page),
            Value::from(event.session_id),
            Value::from(event.song),
            Value::from(event.ts),
            Value::from(event.user_id),
        ],
    );
    db.execute(stmt).await?;
    Ok(())
}

/// Inserts one row into `staging_songs`.
pub async fn insert_song(
    db: &DatabaseConnection,
    song_id: &str,
    title: &str,
    artist_id: &str,
    artist_name: &str,
) -> Result<()> {
    let stmt = Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"INSERT INTO staging_songs
            (num_songs, artist_id, artist_latitude, artist_longitude, artist_location,
             artist_name, song_id, title, duration, year)
           VALUES (1, ?, 33.4, -112.0, 'Phoenix, AZ', ?, ?, ?, 200.5, 2004)"#,
        [
            Value::from(artist_id),
            Value::from(artist_name),
            Value::from(song_id),
            Value::from(title),
        ],
    );
    db.execute(stmt).await?;
    Ok(())
}

/// Runs a `SELECT COUNT(*)` style query and returns the single integer.
pub async fn scalar(db: &DatabaseConnection, sql: &str) -> Result<i64> {
    let row = db
        .query_one(Statement::from_string(db.get_database_backend(), sql.to_string()))
        .await?
        .ok_or_else(|| anyhow::anyhow!("query returned no rows: {sql}"))?;
    Ok(row.try_get_by_index::<i64>(0)?)
}
