//! Column layouts of the two staging tables.
//!
//! Staging columns keep the camel-case field names of the source JSON, so
//! they are addressed through plain aliases rather than derived identifiers.

/// Storage class of a staging column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Varchar,
    Timestamp,
}

/// A staging column in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingColumn {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> StagingColumn {
    StagingColumn { name, kind }
}

/// Raw application log events, one row per event.
pub const STAGING_EVENTS_COLUMNS: &[StagingColumn] = &[
    col("artist", ColumnKind::Varchar),
    col("auth", ColumnKind::Varchar),
    col("firstName", ColumnKind::Varchar),
    col("gender", ColumnKind::Varchar),
    col("itemInSession", ColumnKind::Integer),
    col("lastName", ColumnKind::Varchar),
    col("length", ColumnKind::Float),
    col("level", ColumnKind::Varchar),
    col("location", ColumnKind::Varchar),
    col("method", ColumnKind::Varchar),
    col("page", ColumnKind::Varchar),
    col("registration", ColumnKind::Varchar),
    col("sessionId", ColumnKind::Integer),
    col("song", ColumnKind::Varchar),
    col("status", ColumnKind::Integer),
    col("ts", ColumnKind::Timestamp),
    col("userAgent", ColumnKind::Varchar),
    col("userId", ColumnKind::Integer),
];

/// Raw song catalog records.
pub const STAGING_SONGS_COLUMNS: &[StagingColumn] = &[
    col("num_songs", ColumnKind::Integer),
    col("artist_id", ColumnKind::Varchar),
    col("artist_latitude", ColumnKind::Float),
    col("artist_longitude", ColumnKind::Float),
    col("artist_location", ColumnKind::Varchar),
    col("artist_name", ColumnKind::Varchar),
    col("song_id", ColumnKind::Varchar),
    col("title", ColumnKind::Varchar),
    col("duration", ColumnKind::Float),
    col("year", ColumnKind::Integer),
];
