//! Configuration loading for the warehouse ETL driver.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `DWH_`, producing a typed [`AppConfig`] that is handed explicitly to each
//! pipeline component.

use std::{collections::BTreeMap, env, fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const ENV_PREFIX: &str = "DWH_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `DWH_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Explicit connection URL; takes precedence over the cluster settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default = "default_db_connect_attempts")]
    pub db_connect_attempts: u32,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub load_mode: LoadMode,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub iam_role: IamRoleConfig,
    #[serde(default)]
    pub geo: GeoConfig,
}

/// Warehouse endpoint (`DWH_CLUSTER_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_password: Option<String>,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
}

/// Source data locations (`DWH_S3_*`).
///
/// Values may be written with surrounding single quotes; the loader strips
/// them before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct S3Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_data: Option<String>,
    /// JSON shape descriptor for the event logs: `auto` or a jsonpaths file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_json_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_data: Option<String>,
}

/// Role assumed by the warehouse when reading the sources (`DWH_IAM_ROLE_ARN`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IamRoleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
}

/// Region of the source bucket (`DWH_GEO_REGION`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GeoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// What the orchestrator does after a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and run the next stage anyway.
    #[default]
    Continue,
    /// Stop at the first failed stage.
    Abort,
}

/// How the transform writes into the dimension and fact tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Insert on top of existing rows; re-running duplicates them.
    #[default]
    Append,
    /// Empty each target table before inserting.
    Truncate,
    /// Replace rows whose natural key appears in staging, then insert.
    Upsert,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "abort" | "strict" => Ok(FailurePolicy::Abort),
            _ => Err(ConfigError::InvalidFailurePolicy {
                value: value.to_string(),
            }),
        }
    }
}

impl FromStr for LoadMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(LoadMode::Append),
            "truncate" => Ok(LoadMode::Truncate),
            "upsert" => Ok(LoadMode::Upsert),
            _ => Err(ConfigError::InvalidLoadMode {
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => f.write_str("continue"),
            FailurePolicy::Abort => f.write_str("abort"),
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Append => f.write_str("append"),
            LoadMode::Truncate => f.write_str("truncate"),
            LoadMode::Upsert => f.write_str("upsert"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: None,
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            db_connect_attempts: default_db_connect_attempts(),
            failure_policy: FailurePolicy::default(),
            load_mode: LoadMode::default(),
            cluster: ClusterConfig::default(),
            s3: S3Config::default(),
            iam_role: IamRoleConfig::default(),
            geo: GeoConfig::default(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: None,
            db_name: None,
            db_user: None,
            db_password: None,
            db_port: default_db_port(),
        }
    }
}

impl AppConfig {
    /// Returns the URL used to open the warehouse session.
    ///
    /// An explicit `DWH_DATABASE_URL` wins; otherwise a `postgres://` URL is
    /// assembled from the cluster settings with credentials percent-encoded.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }

        let host = required(&self.cluster.host, "DWH_CLUSTER_HOST")?;
        let db_name = required(&self.cluster.db_name, "DWH_CLUSTER_DB_NAME")?;
        let db_user = required(&self.cluster.db_user, "DWH_CLUSTER_DB_USER")?;

        let mut url = Url::parse(&format!("postgres://{host}")).map_err(|source| {
            ConfigError::InvalidClusterHost {
                value: host.to_string(),
                source,
            }
        })?;
        let invalid_host = || ConfigError::InvalidClusterHost {
            value: host.to_string(),
            source: url::ParseError::EmptyHost,
        };
        url.set_username(db_user).map_err(|_| invalid_host())?;
        if let Some(password) = &self.cluster.db_password {
            url.set_password(Some(password))
                .map_err(|_| invalid_host())?;
        }
        url.set_port(Some(self.cluster.db_port))
            .map_err(|_| invalid_host())?;
        url.set_path(db_name);
        Ok(url.into())
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.cluster.db_password.is_some() {
            config.cluster.db_password = Some(REDACTED.to_string());
        }
        if let Some(url) = config.database_url.as_deref() {
            config.database_url = Some(redact_url(url));
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates settings that do not depend on which stages will run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.db_connect_attempts == 0 {
            return Err(ConfigError::InvalidConnectAttempts {
                value: self.db_connect_attempts,
            });
        }

        if self.cluster.db_port == 0 {
            return Err(ConfigError::InvalidClusterPort {
                value: self.cluster.db_port.to_string(),
            });
        }

        Ok(())
    }
}

fn required<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingClusterSetting { key })
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some(REDACTED));
            url.into()
        }
        _ => raw.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_db_port() -> u16 {
    5439
}

fn default_db_acquire_timeout_ms() -> u64 {
    30_000
}

fn default_db_connect_attempts() -> u32 {
    1
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("{key} is not set; set it or provide DWH_DATABASE_URL")]
    MissingClusterSetting { key: &'static str },
    #[error("invalid cluster host '{value}': {source}")]
    InvalidClusterHost {
        value: String,
        source: url::ParseError,
    },
    #[error("invalid cluster port '{value}'")]
    InvalidClusterPort { value: String },
    #[error("invalid log format '{value}'; expected json or pretty")]
    InvalidLogFormat { value: String },
    #[error("database connect attempts must be at least 1, got {value}")]
    InvalidConnectAttempts { value: u32 },
    #[error("invalid numeric value '{value}' for {key}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid failure policy '{value}'; expected continue or abort")]
    InvalidFailurePolicy { value: String },
    #[error("invalid load mode '{value}'; expected append, truncate or upsert")]
    InvalidLoadMode { value: String },
}

/// Loads configuration using layered `.env` files and `DWH_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take(&mut layered, "LOG_FORMAT")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let database_url = take(&mut layered, "DATABASE_URL");

        let db_acquire_timeout_ms = parse_number(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);
        let db_connect_attempts = parse_number(&mut layered, "DB_CONNECT_ATTEMPTS")?
            .unwrap_or_else(default_db_connect_attempts);

        let failure_policy = take(&mut layered, "FAILURE_POLICY")
            .map(|v| v.parse::<FailurePolicy>())
            .transpose()?
            .unwrap_or_default();
        let load_mode = take(&mut layered, "LOAD_MODE")
            .map(|v| v.parse::<LoadMode>())
            .transpose()?
            .unwrap_or_default();

        let db_port = match take(&mut layered, "CLUSTER_DB_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidClusterPort { value: raw })?,
            None => default_db_port(),
        };
        let cluster = ClusterConfig {
            host: take(&mut layered, "CLUSTER_HOST"),
            db_name: take(&mut layered, "CLUSTER_DB_NAME"),
            db_user: take(&mut layered, "CLUSTER_DB_USER"),
            db_password: take(&mut layered, "CLUSTER_DB_PASSWORD"),
            db_port,
        };

        let s3 = S3Config {
            log_data: take(&mut layered, "S3_LOG_DATA"),
            log_json_path: take(&mut layered, "S3_LOG_JSON_PATH"),
            song_data: take(&mut layered, "S3_SONG_DATA"),
        };
        let iam_role = IamRoleConfig {
            arn: take(&mut layered, "IAM_ROLE_ARN"),
        };
        let geo = GeoConfig {
            region: take(&mut layered, "GEO_REGION"),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_acquire_timeout_ms,
            db_connect_attempts,
            failure_policy,
            load_mode,
            cluster,
            s3,
            iam_role,
            geo,
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("DWH_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a key, treating blank values as unset.
fn take(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    take(values, key)
        .map(|raw| {
            raw.parse()
                .map_err(|_| ConfigError::InvalidNumber { key, value: raw })
        })
        .transpose()
}
