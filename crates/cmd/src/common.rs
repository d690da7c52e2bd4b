// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use dailystats::{Config, DailyStatsJob, LocalQueryService, build_object_store, load_config};
use diagnostics::*;

/// Config file used when neither `--config` nor `DAILYSTATS_CONFIG` is given
pub const DEFAULT_CONFIG: &str = "dailystats.yaml";

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "DAILYSTATS_CONFIG";

/// Get the config path with an optional override, falling back to
/// `DAILYSTATS_CONFIG` and then `dailystats.yaml`
#[must_use]
pub fn config_path_with_override(override_path: Option<PathBuf>) -> PathBuf {
    override_path
        .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

/// Load the YAML file and overlay credentials and the target URL from the
/// process environment
pub fn load_resolved_config(path: &Path) -> Result<Config> {
    let display = path.display().to_string();
    debug!("Loading configuration from {display}");

    let config = load_config(path)
        .with_context(|| format!("Failed to load configuration from {display}"))?
        .with_env_overrides(|name| env::var(name).ok());
    config
        .check_credentials()
        .context("Credentials are required for an s3:// target")?;
    Ok(config)
}

/// Parse a `YYYY-MM-DD` command line date
pub fn parse_date(value: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{value}': {e}"))
}

/// Build the query backend and object store a job runs against
pub async fn build_job(config: &Config) -> Result<DailyStatsJob> {
    let lake = config.source.lake_path.as_ref().ok_or_else(|| {
        anyhow!("source.lake_path must point at the line item lake for the local query backend")
    })?;

    let mut service = match config.local_catalog_path() {
        Some(path) => LocalQueryService::new()
            .with_catalog_file(&path)
            .await
            .with_context(|| format!("Failed to open catalog file {}", path.display()))?,
        None => LocalQueryService::new(),
    };
    service
        .register_csv_table(&config.source.database, &config.source.table, lake)
        .await
        .with_context(|| format!("Failed to open line item lake at {}", lake.display()))?;
    service.register_database(&config.target.database);

    let store = build_object_store(config)
        .with_context(|| format!("Failed to open target store {}", config.target.url))?;

    Ok(DailyStatsJob::new(config, Arc::new(service), store))
}
