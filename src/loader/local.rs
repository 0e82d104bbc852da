//! Local stand-in for the warehouse `COPY`: ingests JSON files from disk
//! into a staging table of the SQLite dialect.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use metrics::counter;
use regex::Regex;
use sea_orm::sea_query::{Alias, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, TransactionTrait, Value};
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use star_schema::{ColumnKind, StagingColumn};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{CopyJob, JsonShape, SourceLocation, StagingCopier};
use crate::error::EtlError;

/// Default `VARCHAR` width; longer strings are cut like `TRUNCATECOLUMNS`.
const VARCHAR_WIDTH: usize = 256;
const INSERT_BATCH: usize = 200;

/// Reads `.json` files and inserts their records in a single transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalJsonCopier;

/// Text representation of timestamps in the local dialect.
fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[derive(Debug, Deserialize)]
struct JsonPathsFile {
    jsonpaths: Vec<String>,
}

enum FieldMapping {
    /// Object keys matched exactly to the lowercased column names, the way
    /// the warehouse folds identifiers.
    Auto,
    /// One top-level key per staging column, in column order.
    Positional(Vec<String>),
}

#[async_trait]
impl StagingCopier for LocalJsonCopier {
    async fn copy(&self, db: &DatabaseConnection, job: &CopyJob) -> Result<u64, EtlError> {
        let table = job.table.name();
        let Some(columns) = job.table.staging_columns() else {
            return Err(EtlError::copy_parameter(
                "table",
                format!("{table} is not a staging table"),
            ));
        };
        let SourceLocation::Local(root) = &job.source else {
            return Err(EtlError::copy_parameter(
                "source",
                format!("{} is not a local path", job.source),
            ));
        };
        let mapping = match &job.shape {
            JsonShape::Auto => FieldMapping::Auto,
            JsonShape::Paths(SourceLocation::Local(path)) => {
                FieldMapping::Positional(read_jsonpaths(path, columns.len()).await?)
            }
            JsonShape::Paths(other) => {
                return Err(EtlError::copy_parameter(
                    "json shape",
                    format!("{other} is not a local path"),
                ));
            }
        };

        let mut rows = Vec::new();
        for file in source_files(root)? {
            let bytes = tokio::fs::read(&file)
                .await
                .map_err(|source| EtlError::SourceIo {
                    path: file.clone(),
                    source,
                })?;
            let before = rows.len();
            for record in serde_json::Deserializer::from_slice(&bytes).into_iter::<Json>() {
                let record = record.map_err(|source| EtlError::SourceJson {
                    path: file.clone(),
                    source,
                })?;
                let Json::Object(record) = record else {
                    return Err(EtlError::InvalidSourceValue {
                        path: file.clone(),
                        column: "(record)",
                        value: record.to_string(),
                    });
                };
                rows.push(convert_record(&file, columns, &mapping, &record, job.epoch_millis)?);
            }
            debug!(table, file = %file.display(), records = rows.len() - before, "read source file");
        }

        let step = format!("copy {table}");
        let backend = db.get_database_backend();
        let txn = db
            .begin()
            .await
            .map_err(|source| EtlError::statement(step.as_str(), source))?;
        for chunk in rows.chunks(INSERT_BATCH) {
            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(table))
                .columns(columns.iter().map(|column| Alias::new(column.name)));
            for row in chunk {
                insert
                    .values(row.iter().cloned().map(SimpleExpr::from))
                    .map_err(|err| {
                        EtlError::statement(step.as_str(), DbErr::Custom(err.to_string()))
                    })?;
            }
            txn.execute(backend.build(&insert))
                .await
                .map_err(|source| EtlError::statement(step.as_str(), source))?;
        }
        txn.commit()
            .await
            .map_err(|source| EtlError::statement(step.as_str(), source))?;

        let loaded = rows.len() as u64;
        counter!("dwh_staging_rows_total", "table" => table).increment(loaded);
        info!(table, rows = loaded, "ingested local JSON source");
        Ok(loaded)
    }
}

/// Lists `.json` files under `root` in file-name order. A single file is
/// accepted as is.
fn source_files(root: &Path) -> Result<Vec<PathBuf>, EtlError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| EtlError::SourceIo {
            path: root.to_path_buf(),
            source: io::Error::from(err),
        })?;
        let is_json = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if entry.file_type().is_file() && (is_json || entry.depth() == 0) {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(EtlError::SourceIo {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no .json files found"),
        });
    }
    Ok(files)
}

async fn read_jsonpaths(path: &Path, expected: usize) -> Result<Vec<String>, EtlError> {
    static PATH_EXPR: OnceLock<Regex> = OnceLock::new();
    let pattern = PATH_EXPR.get_or_init(|| {
        Regex::new(r#"^\$(?:\[['"]([^'"]+)['"]\]|\.([A-Za-z_][A-Za-z0-9_]*))$"#)
            .expect("jsonpath pattern is valid")
    });

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| EtlError::SourceIo {
            path: path.to_path_buf(),
            source,
        })?;
    let descriptor: JsonPathsFile =
        serde_json::from_slice(&bytes).map_err(|source| EtlError::SourceJson {
            path: path.to_path_buf(),
            source,
        })?;

    if descriptor.jsonpaths.len() != expected {
        return Err(EtlError::copy_parameter(
            "DWH_S3_LOG_JSON_PATH",
            format!(
                "{} lists {} paths but the table has {expected} columns",
                path.display(),
                descriptor.jsonpaths.len()
            ),
        ));
    }

    descriptor
        .jsonpaths
        .iter()
        .map(|expr| {
            pattern
                .captures(expr.trim())
                .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
                .map(|key| key.as_str().to_string())
                .ok_or_else(|| {
                    EtlError::copy_parameter(
                        "DWH_S3_LOG_JSON_PATH",
                        format!("unsupported JSONPath expression '{expr}'"),
                    )
                })
        })
        .collect()
}

fn convert_record(
    file: &Path,
    columns: &[StagingColumn],
    mapping: &FieldMapping,
    record: &Map<String, Json>,
    epoch_millis: bool,
) -> Result<Vec<Value>, EtlError> {
    columns
        .iter()
        .enumerate()
        .map(|(position, column)| {
            let field = match mapping {
                FieldMapping::Auto => record.get(&column.name.to_ascii_lowercase()),
                FieldMapping::Positional(keys) => record.get(&keys[position]),
            };
            convert_value(column, field, epoch_millis).ok_or_else(|| EtlError::InvalidSourceValue {
                path: file.to_path_buf(),
                column: column.name,
                value: field.map(Json::to_string).unwrap_or_default(),
            })
        })
        .collect()
}

/// Converts one JSON field to a bound value; `None` when it does not fit the
/// column type.
fn convert_value(column: &StagingColumn, field: Option<&Json>, epoch_millis: bool) -> Option<Value> {
    let field = match field {
        None | Some(Json::Null) => return Some(null_of(column.kind)),
        Some(Json::String(s)) if s.trim().is_empty() => return Some(null_of(column.kind)),
        Some(field) => field,
    };

    match column.kind {
        ColumnKind::Varchar => {
            let text = match field {
                Json::String(s) => s.clone(),
                Json::Number(n) => n.to_string(),
                Json::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some(Value::from(Some(truncate(text, VARCHAR_WIDTH))))
        }
        ColumnKind::Integer => {
            let n = match field {
                Json::Number(n) => n.as_i64()?,
                Json::String(s) => s.trim().parse::<i64>().ok()?,
                _ => return None,
            };
            Some(Value::from(Some(i32::try_from(n).ok()?)))
        }
        ColumnKind::Float => {
            let n = match field {
                Json::Number(n) => n.as_f64()?,
                Json::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            Some(Value::from(Some(n)))
        }
        ColumnKind::Timestamp => {
            let ts = if epoch_millis {
                let millis = match field {
                    Json::Number(n) => n.as_i64()?,
                    Json::String(s) => s.trim().parse::<i64>().ok()?,
                    _ => return None,
                };
                DateTime::from_timestamp_millis(millis)?.naive_utc()
            } else {
                let Json::String(s) = field else {
                    return None;
                };
                NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?
            };
            Some(Value::from(Some(format_timestamp(ts))))
        }
    }
}

fn null_of(kind: ColumnKind) -> Value {
    match kind {
        ColumnKind::Integer => Value::from(None::<i32>),
        ColumnKind::Float => Value::from(None::<f64>),
        ColumnKind::Varchar | ColumnKind::Timestamp => Value::from(None::<String>),
    }
}

fn truncate(mut text: String, width: usize) -> String {
    if text.len() > width {
        let mut end = width;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use star_schema::{STAGING_EVENTS_COLUMNS, STAGING_SONGS_COLUMNS};

    fn column(name: &str) -> &'static StagingColumn {
        STAGING_EVENTS_COLUMNS
            .iter()
            .chain(STAGING_SONGS_COLUMNS)
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn blank_strings_become_null() {
        let value = convert_value(column("firstName"), Some(&json!("   ")), false).unwrap();
        assert_eq!(value, Value::String(None));
        let value = convert_value(column("userId"), Some(&json!("")), false).unwrap();
        assert_eq!(value, Value::Int(None));
    }

    #[test]
    fn numeric_strings_fill_integer_columns() {
        let value = convert_value(column("userId"), Some(&json!("39")), false).unwrap();
        assert_eq!(value, Value::Int(Some(39)));
        assert!(convert_value(column("userId"), Some(&json!("abc")), false).is_none());
        assert!(convert_value(column("userId"), Some(&json!(1.5)), false).is_none());
    }

    #[test]
    fn epoch_millis_become_timestamps() {
        let value = convert_value(column("ts"), Some(&json!(1541073600000_i64)), true).unwrap();
        assert_eq!(value, Value::from(Some("2018-11-01 12:00:00.000".to_string())));
    }

    #[test]
    fn long_strings_are_truncated_on_a_char_boundary() {
        let text = format!("{}é", "a".repeat(255));
        let cut = truncate(text, VARCHAR_WIDTH);
        assert_eq!(cut.len(), 255);
        assert!(cut.chars().all(|c| c == 'a'));
    }

    #[test]
    fn auto_mapping_only_matches_lowercase_keys() {
        let record = json!({"ARTIST_ID": "AR1", "num_songs": 1});
        let Json::Object(record) = record else {
            unreachable!()
        };
        let row = convert_record(
            Path::new("song.json"),
            STAGING_SONGS_COLUMNS,
            &FieldMapping::Auto,
            &record,
            false,
        )
        .unwrap();
        assert_eq!(row[0], Value::Int(Some(1)));
        assert_eq!(row[1], Value::String(None));
        assert_eq!(row[2], Value::Double(None));
    }

    #[test]
    fn auto_mapping_skips_mixed_case_event_keys() {
        let record = json!({"firstName": "Adelyn", "firstname": "Lily", "page": "NextSong"});
        let Json::Object(record) = record else {
            unreachable!()
        };
        let row = convert_record(
            Path::new("events.json"),
            STAGING_EVENTS_COLUMNS,
            &FieldMapping::Auto,
            &record,
            false,
        )
        .unwrap();
        let at = |name: &str| {
            STAGING_EVENTS_COLUMNS
                .iter()
                .position(|c| c.name == name)
                .unwrap()
        };
        assert_eq!(row[at("firstName")], Value::from(Some("Lily".to_string())));
        assert_eq!(row[at("page")], Value::from(Some("NextSong".to_string())));
    }

    #[test]
    fn nested_values_are_rejected() {
        let record = json!({"artist_name": {"first": "x"}});
        let Json::Object(record) = record else {
            unreachable!()
        };
        let err = convert_record(
            Path::new("song.json"),
            STAGING_SONGS_COLUMNS,
            &FieldMapping::Auto,
            &record,
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EtlError::InvalidSourceValue {
                column: "artist_name",
                ..
            }
        ));
    }
}
