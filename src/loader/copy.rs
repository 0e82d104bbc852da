//! Copy parameter validation and Redshift `COPY` rendering.
//!
//! `COPY` takes no bind parameters, so every configured value is validated
//! here and substituted only as an escaped string literal.

use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use sea_orm::DatabaseConnection;
use url::Url;

use super::{CopyJob, JsonShape, SourceLocation, StagingCopier};
use crate::config::AppConfig;
use crate::db::{self, Dialect};
use crate::error::EtlError;

/// Role and region the warehouse uses to read object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCredentials {
    pub iam_role: String,
    pub region: String,
}

impl CopyCredentials {
    pub fn from_config(config: &AppConfig) -> Result<Self, EtlError> {
        let iam_role = validate_iam_role(required("DWH_IAM_ROLE_ARN", &config.iam_role.arn)?)?;
        let region = validate_region(required("DWH_GEO_REGION", &config.geo.region)?)?;
        Ok(Self { iam_role, region })
    }
}

/// Executes warehouse-native `COPY` statements.
#[derive(Debug, Clone)]
pub struct RedshiftCopier {
    credentials: CopyCredentials,
}

impl RedshiftCopier {
    pub fn new(credentials: CopyCredentials) -> Self {
        Self { credentials }
    }

    /// Renders the `COPY` statement for `job`.
    pub fn render(&self, job: &CopyJob) -> Result<String, EtlError> {
        let SourceLocation::S3(source) = &job.source else {
            return Err(EtlError::copy_parameter(
                "source",
                format!("{} is not an s3:// location", job.source),
            ));
        };
        let shape = match &job.shape {
            JsonShape::Auto => "auto".to_string(),
            JsonShape::Paths(SourceLocation::S3(location)) => location.clone(),
            JsonShape::Paths(other) => {
                return Err(EtlError::copy_parameter(
                    "json shape",
                    format!("{other} is not an s3:// location"),
                ));
            }
        };

        let mut sql = format!(
            "COPY {table}\n    FROM {from}\n    IAM_ROLE {role}\n    REGION {region}\n    FORMAT AS JSON {shape}\n",
            table = job.table.name(),
            from = literal(source),
            role = literal(&self.credentials.iam_role),
            region = literal(&self.credentials.region),
            shape = literal(&shape),
        );
        if job.epoch_millis {
            sql.push_str("    TIMEFORMAT 'epochmillisecs'\n");
        }
        sql.push_str("    TRUNCATECOLUMNS BLANKSASNULL EMPTYASNULL;");
        Ok(sql)
    }
}

#[async_trait]
impl StagingCopier for RedshiftCopier {
    async fn copy(&self, db: &DatabaseConnection, job: &CopyJob) -> Result<u64, EtlError> {
        let sql = self.render(job)?;
        db::execute(db, &format!("copy {}", job.table), &sql).await
    }
}

/// Rejects sources the connected dialect cannot read.
pub(super) fn ensure_reachable(dialect: Dialect, job: &CopyJob) -> Result<(), EtlError> {
    let mut locations = vec![&job.source];
    if let JsonShape::Paths(paths) = &job.shape {
        locations.push(paths);
    }
    for location in locations {
        match (dialect, location) {
            (Dialect::Redshift, SourceLocation::Local(path)) => {
                return Err(EtlError::copy_parameter(
                    "source",
                    format!(
                        "{} is a local path; Redshift can only copy from s3:// locations",
                        path.display()
                    ),
                ));
            }
            (Dialect::Sqlite, SourceLocation::S3(location)) => {
                return Err(EtlError::copy_parameter(
                    "source",
                    format!("{location} is an object-storage location; the local dialect reads files only"),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

pub(super) fn required<'a>(name: &'static str, value: &'a Option<String>) -> Result<&'a str, EtlError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EtlError::copy_parameter(name, "not configured"))
}

/// Parses a source location: `s3://`, `file://`, or a plain local path.
pub(super) fn parse_location(name: &'static str, raw: &str) -> Result<SourceLocation, EtlError> {
    let value = checked(name, raw)?;

    if value.starts_with("s3://") {
        // The URL is only checked; COPY receives the text as configured so
        // that keys with spaces or dot segments are not rewritten.
        let url = Url::parse(value)
            .map_err(|err| EtlError::copy_parameter(name, format!("invalid s3 URL: {err}")))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(EtlError::copy_parameter(name, "s3 URL has no bucket"));
        }
        return Ok(SourceLocation::S3(value.to_string()));
    }

    if value.starts_with("file://") {
        let path = Url::parse(value)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| EtlError::copy_parameter(name, format!("invalid file URL '{value}'")))?;
        return Ok(SourceLocation::Local(path));
    }

    if value.contains("://") {
        return Err(EtlError::copy_parameter(
            name,
            format!("unsupported location scheme in '{value}'"),
        ));
    }

    Ok(SourceLocation::Local(PathBuf::from(value)))
}

/// Parses the JSON shape descriptor: `auto` or a jsonpaths location.
pub(super) fn parse_json_shape(raw: &str) -> Result<JsonShape, EtlError> {
    let value = checked("DWH_S3_LOG_JSON_PATH", raw)?;
    if value.eq_ignore_ascii_case("auto") {
        return Ok(JsonShape::Auto);
    }
    parse_location("DWH_S3_LOG_JSON_PATH", value).map(JsonShape::Paths)
}

pub(super) fn validate_iam_role(raw: &str) -> Result<String, EtlError> {
    static ARN: OnceLock<Regex> = OnceLock::new();
    let pattern = ARN.get_or_init(|| {
        Regex::new(r"^arn:aws(-[a-z]+)*:iam::\d{12}:role/[A-Za-z0-9+=,.@_/-]+$")
            .expect("IAM role pattern is valid")
    });

    let value = checked("DWH_IAM_ROLE_ARN", raw)?;
    if !pattern.is_match(value) {
        return Err(EtlError::copy_parameter(
            "DWH_IAM_ROLE_ARN",
            format!("'{value}' is not an IAM role ARN"),
        ));
    }
    Ok(value.to_string())
}

pub(super) fn validate_region(raw: &str) -> Result<String, EtlError> {
    static REGION: OnceLock<Regex> = OnceLock::new();
    let pattern =
        REGION.get_or_init(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").expect("region pattern is valid"));

    let value = checked("DWH_GEO_REGION", raw)?;
    if !pattern.is_match(value) {
        return Err(EtlError::copy_parameter(
            "DWH_GEO_REGION",
            format!("'{value}' is not a region name"),
        ));
    }
    Ok(value.to_string())
}

/// Strips surrounding quotes and rejects characters that could escape a
/// string literal.
fn checked<'a>(name: &'static str, raw: &'a str) -> Result<&'a str, EtlError> {
    let value = unquote(raw.trim());
    if value.is_empty() {
        return Err(EtlError::copy_parameter(name, "must not be empty"));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| matches!(c, '\'' | '"' | '\\' | ';') || c.is_control())
    {
        return Err(EtlError::copy_parameter(
            name,
            format!("contains forbidden character {bad:?}"),
        ));
    }
    Ok(value)
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    value
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
