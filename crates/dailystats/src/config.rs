// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Job configuration, loaded once at startup and passed by reference.

use crate::error::{ConfigError, QueryError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Largest page the query service hands out per results call
pub const MAX_PAGE_SIZE: usize = 1000;

pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY";
pub const ACCESS_SECRET_ENV: &str = "AWS_ACCESS_SECRET";
pub const SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";
pub const TARGET_URL_ENV: &str = "DAILYSTATS_TARGET_URL";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Leading path segment of every published key, e.g. "shopify"
    pub domain: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    /// Never read from or written to the YAML file
    #[serde(skip)]
    pub credentials: Credentials,
}

/// Where line items are read from
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub database: String,
    pub table: String,
    /// Location the query service spools results to
    pub result_location: String,
    /// Root of a local hive-partitioned CSV lake for the DataFusion backend
    #[serde(default)]
    pub lake_path: Option<PathBuf>,
    /// Tables and partitions recorded by the local backend. Defaults to a
    /// `.catalog.yaml` file beside `lake_path`.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub first_order_source: FirstOrderSource,
}

/// How a customer's first order date is determined
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FirstOrderSource {
    /// Earliest order within the queried day only
    #[default]
    Batch,
    /// Earliest order across every partition before the target date
    LakeHistory,
}

/// Where daily stats are written and registered
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TargetConfig {
    /// `s3://bucket`, `file:///path`, a bare path, or `memory://`
    pub url: String,
    pub database: String,
    pub table: String,
    pub file_stem: String,
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Bounded status polling
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PollingConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f32,
    pub max_polls: usize,
    pub max_wait_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_polls: 120,
            max_wait_secs: 900,
        }
    }
}

/// Access credentials for the query service and object store
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl Credentials {
    /// Both halves present, or the matching taxonomy error
    pub fn require(&self) -> Result<(&str, &str), QueryError> {
        match (
            non_empty(&self.access_key_id),
            non_empty(&self.secret_access_key),
        ) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            (None, None) => Err(QueryError::CredentialsMissing),
            (None, Some(_)) => Err(QueryError::CredentialsIncomplete(
                ACCESS_KEY_ENV.to_string(),
            )),
            (Some(_), None) => Err(QueryError::CredentialsIncomplete(
                ACCESS_SECRET_ENV.to_string(),
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = non_empty(&self.access_key_id).map(|key| {
            if key.chars().count() > 4 {
                format!("{}...", key.chars().take(4).collect::<String>())
            } else {
                "...".to_string()
            }
        });
        f.debug_struct("Credentials")
            .field("access_key_id", &preview)
            .field(
                "secret_access_key",
                &non_empty(&self.secret_access_key).map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &non_empty(&self.session_token).map(|_| "<redacted>"),
            )
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

fn default_extension() -> String {
    "csv".to_string()
}

impl Config {
    /// Overlay credentials and the target URL from a variable lookup.
    ///
    /// The lookup is injected so only the binary touches the process
    /// environment.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        self.credentials = Credentials {
            access_key_id: lookup(ACCESS_KEY_ENV),
            secret_access_key: lookup(ACCESS_SECRET_ENV),
            session_token: lookup(SESSION_TOKEN_ENV),
        };
        if let Some(url) = lookup(TARGET_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.target.url = url;
        }
        self
    }

    /// Whether publishing goes to Amazon S3 and therefore needs credentials
    #[must_use]
    pub fn target_is_s3(&self) -> bool {
        self.target.url.starts_with("s3://")
    }

    /// Catalog file of the local backend, if there is a local lake
    #[must_use]
    pub fn local_catalog_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.source.catalog_path {
            return Some(path.clone());
        }
        let lake = self.source.lake_path.as_ref()?;
        if lake.file_name().is_some() {
            Some(lake.with_extension("catalog.yaml"))
        } else {
            Some(lake.join("catalog.yaml"))
        }
    }

    /// Check credentials needed by the configured backends
    pub fn check_credentials(&self) -> Result<(), ConfigError> {
        if self.target_is_s3() {
            let _ = self.credentials.require()?;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.as_ref().display().to_string(),
        source,
    })?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml_ng::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub(crate) fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let required = [
        ("domain", &config.domain),
        ("source.database", &config.source.database),
        ("source.table", &config.source.table),
        ("target.url", &config.target.url),
        ("target.database", &config.target.database),
        ("target.table", &config.target.table),
        ("target.file_stem", &config.target.file_stem),
        ("target.extension", &config.target.extension),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{name} cannot be empty")));
        }
    }

    if config.domain.contains('/') {
        return Err(ConfigError::Invalid(
            "domain must be a single path segment".to_string(),
        ));
    }

    if config.source.page_size == 0 || config.source.page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::Invalid(format!(
            "source.page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let polling = &config.polling;
    if polling.max_polls == 0 {
        return Err(ConfigError::Invalid(
            "polling.max_polls must be greater than 0".to_string(),
        ));
    }
    if !polling.multiplier.is_finite() || polling.multiplier < 1.0 {
        return Err(ConfigError::Invalid(
            "polling.multiplier must be at least 1".to_string(),
        ));
    }
    if polling.max_delay_ms < polling.initial_delay_ms {
        return Err(ConfigError::Invalid(
            "polling.max_delay_ms must not be below polling.initial_delay_ms".to_string(),
        ));
    }

    Ok(())
}

/// Example configuration written by `dailystats init`
#[must_use]
pub fn example_config() -> Config {
    Config {
        domain: "shopify".to_string(),
        region: default_region(),
        source: SourceConfig {
            database: "prymal".to_string(),
            table: "shopify_line_items".to_string(),
            result_location: "s3://prymal-ops/athena_query_results/".to_string(),
            lake_path: Some(PathBuf::from("./lake")),
            catalog_path: None,
            page_size: MAX_PAGE_SIZE,
            first_order_source: FirstOrderSource::Batch,
        },
        target: TargetConfig {
            url: "file:///tmp/dailystats".to_string(),
            database: "prymal-analytics".to_string(),
            table: "shopify_daily_stats".to_string(),
            file_stem: "shopify_daily_stats".to_string(),
            extension: default_extension(),
        },
        polling: PollingConfig::default(),
        credentials: Credentials::default(),
    }
}

/// Write the example configuration to `path`
pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
    let yaml = serde_yaml_ng::to_string(&example_config())?;
    std::fs::write(&path, yaml).map_err(|source| ConfigError::Write {
        path: path.as_ref().display().to_string(),
        source,
    })
}
