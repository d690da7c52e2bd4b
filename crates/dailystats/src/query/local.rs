// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! DataFusion-backed [`QueryService`] over a local hive-partitioned CSV lake.
//!
//! Statements run to completion inside `start_query`, so every status poll
//! already sees a terminal state. Table and partition DDL is not something
//! DataFusion understands; it is recorded in a [`LocalCatalog`] instead,
//! which is written to a YAML file when one is configured.

use super::{ExecutionId, QueryRequest, QueryService, QueryState, QueryStatus, ResultPage};
use crate::error::QueryError;
use arrow::util::display::array_value_to_string;
use arrow_array::Array;
use arrow_schema::DataType;
use async_trait::async_trait;
use datafusion::error::DataFusionError;
use datafusion::prelude::{CsvReadOptions, SessionContext};
use diagnostics::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Hive partition columns of the line item lake
pub const LAKE_PARTITION_COLUMNS: [&str; 3] = ["year", "month", "day"];

static ADD_PARTITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*ALTER\s+TABLE\s+([`"\w.-]+)\s+ADD\s+(IF\s+NOT\s+EXISTS\s+)?PARTITION\s*\(\s*(\w+)\s*=\s*'([^']*)'\s*\)\s*;?\s*$"#,
    )
    .expect("valid partition DDL pattern")
});

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)^\s*CREATE\s+(?:EXTERNAL\s+)?TABLE\s+(IF\s+NOT\s+EXISTS\s+)?([`"\w.-]+)"#)
        .expect("valid table DDL pattern")
});

/// Tables created through DDL and the partitions registered on them
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct LocalCatalog {
    #[serde(default)]
    pub databases: BTreeMap<String, BTreeMap<String, CatalogTable>>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    /// The statement that created the table, as submitted
    pub ddl: String,
    #[serde(default)]
    pub partitions: BTreeSet<String>,
}

impl LocalCatalog {
    fn table(&self, database: &str, table: &str) -> Option<&CatalogTable> {
        self.databases.get(database)?.get(table)
    }
}

enum Execution {
    Succeeded {
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    },
    /// DDL applied to the catalog, no row set
    Applied,
    Failed(String),
}

pub struct LocalQueryService {
    ctx: SessionContext,
    databases: HashSet<String>,
    executions: Mutex<HashMap<ExecutionId, Execution>>,
    catalog: Mutex<LocalCatalog>,
    catalog_path: Option<PathBuf>,
    next_id: AtomicU64,
}

impl Default for LocalQueryService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalQueryService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctx: SessionContext::new(),
            databases: HashSet::new(),
            executions: Mutex::new(HashMap::new()),
            catalog: Mutex::new(LocalCatalog::default()),
            catalog_path: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Keep the catalog in `path`, starting from whatever an earlier process
    /// recorded there. A missing file is an empty catalog.
    pub async fn with_catalog_file(
        mut self,
        path: impl Into<PathBuf>,
    ) -> Result<Self, QueryError> {
        let path = path.into();
        let shown = path.display().to_string();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let catalog: LocalCatalog = serde_yaml_ng::from_str(&content).map_err(|e| {
                    QueryError::Unknown(format!("invalid catalog file {shown}: {e}"))
                })?;
                self.databases.extend(catalog.databases.keys().cloned());
                let tables: usize = catalog.databases.values().map(BTreeMap::len).sum();
                debug!("Loaded {tables} catalog tables from {shown}");
                self.catalog = Mutex::new(catalog);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No catalog at {shown} yet");
            }
            Err(e) => {
                return Err(QueryError::TransientService(format!(
                    "failed to read catalog file {shown}: {e}"
                )));
            }
        }
        self.catalog_path = Some(path);
        Ok(self)
    }

    /// Make a database known without registering any table in it
    pub fn register_database(&mut self, database: &str) {
        let _ = self.databases.insert(database.to_string());
    }

    /// Register `table` as the CSV files under `root`, laid out as
    /// `year=YYYY/month=MM/day=DD/*.csv`.
    pub async fn register_csv_table(
        &mut self,
        database: &str,
        table: &str,
        root: &Path,
    ) -> Result<(), QueryError> {
        if !root.is_dir() {
            return Err(QueryError::ResourceNotFound(format!(
                "lake directory {} does not exist",
                root.display()
            )));
        }

        let mut location = root.display().to_string();
        if !location.ends_with('/') {
            location.push('/');
        }

        let partition_cols = LAKE_PARTITION_COLUMNS
            .iter()
            .map(|name| ((*name).to_string(), DataType::Utf8))
            .collect();
        let options = CsvReadOptions::new()
            .has_header(true)
            .file_extension(".csv")
            .table_partition_cols(partition_cols);

        self.ctx
            .register_csv(table, &location, options)
            .await
            .map_err(classify)?;
        self.register_database(database);

        debug!("Registered table {table} in {database} from {location}");
        Ok(())
    }

    /// Tables created in `database` through DDL
    pub async fn tables(&self, database: &str) -> Vec<String> {
        self.catalog
            .lock()
            .await
            .databases
            .get(database)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Partition specs recorded for a table, e.g. `partition_date=2024-01-01`
    pub async fn partitions(&self, database: &str, table: &str) -> Vec<String> {
        self.catalog
            .lock()
            .await
            .table(database, table)
            .map(|entry| entry.partitions.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn run(&self, request: &QueryRequest) -> Result<Execution, QueryError> {
        if let Some(caps) = CREATE_TABLE.captures(&request.query) {
            let if_not_exists = caps.get(1).is_some();
            let (database, table) = table_ref(&request.database, &caps[2]);
            return self
                .create_table(database, table, if_not_exists, &request.query)
                .await;
        }

        if let Some(caps) = ADD_PARTITION.captures(&request.query) {
            let (database, table) = table_ref(&request.database, &caps[1]);
            let if_not_exists = caps.get(2).is_some();
            let spec = format!("{}={}", &caps[3], &caps[4]);
            return self
                .add_partition(database, table, spec, if_not_exists)
                .await;
        }

        let df = self.ctx.sql(&request.query).await.map_err(classify)?;
        let columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect();

        let batches = match df.collect().await {
            Ok(batches) => batches,
            Err(e) => return Ok(Execution::Failed(e.to_string())),
        };

        let mut rows = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                let mut values = Vec::with_capacity(batch.num_columns());
                for column in batch.columns() {
                    if column.is_null(row) {
                        values.push(None);
                    } else {
                        let value = array_value_to_string(column.as_ref(), row)
                            .map_err(|e| QueryError::Unknown(e.to_string()))?;
                        values.push(Some(value));
                    }
                }
                rows.push(values);
            }
        }

        Ok(Execution::Succeeded { columns, rows })
    }

    async fn create_table(
        &self,
        database: String,
        table: String,
        if_not_exists: bool,
        ddl: &str,
    ) -> Result<Execution, QueryError> {
        if !self.databases.contains(&database) {
            return Ok(Execution::Failed(format!(
                "Database {database} does not exist"
            )));
        }

        let mut catalog = self.catalog.lock().await;
        if catalog.table(&database, &table).is_some() {
            if if_not_exists {
                debug!("Table {table} already exists in {database}");
                return Ok(Execution::Applied);
            }
            return Ok(Execution::Failed(format!(
                "Table {database}.{table} already exists"
            )));
        }

        let mut updated = catalog.clone();
        let _ = updated.databases.entry(database.clone()).or_default().insert(
            table.clone(),
            CatalogTable {
                ddl: ddl.trim().to_string(),
                partitions: BTreeSet::new(),
            },
        );
        self.persist(&updated).await?;
        *catalog = updated;

        info!("Created table {table} in {database}");
        Ok(Execution::Applied)
    }

    async fn add_partition(
        &self,
        database: String,
        table: String,
        spec: String,
        if_not_exists: bool,
    ) -> Result<Execution, QueryError> {
        let mut catalog = self.catalog.lock().await;
        let Some(entry) = catalog.table(&database, &table) else {
            return Ok(Execution::Failed(format!(
                "Table {database}.{table} not found"
            )));
        };

        if entry.partitions.contains(&spec) {
            if if_not_exists {
                debug!("Partition {spec} of {table} already registered");
                return Ok(Execution::Applied);
            }
            return Ok(Execution::Failed(format!(
                "Partition already exists: {spec}"
            )));
        }

        let mut updated = catalog.clone();
        if let Some(entry) = updated
            .databases
            .get_mut(&database)
            .and_then(|tables| tables.get_mut(&table))
        {
            let _ = entry.partitions.insert(spec.clone());
        }
        self.persist(&updated).await?;
        *catalog = updated;

        debug!("Registered partition {spec} of {table} in {database}");
        Ok(Execution::Applied)
    }

    /// Write `catalog` to the catalog file, if there is one
    async fn persist(&self, catalog: &LocalCatalog) -> Result<(), QueryError> {
        let Some(path) = &self.catalog_path else {
            return Ok(());
        };
        let shown = path.display().to_string();
        let failed = |e: std::io::Error| {
            QueryError::TransientService(format!("failed to write catalog file {shown}: {e}"))
        };

        let yaml = serde_yaml_ng::to_string(catalog)
            .map_err(|e| QueryError::Unknown(format!("failed to encode catalog: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        let staging = path.with_extension("yaml.tmp");
        tokio::fs::write(&staging, yaml).await.map_err(failed)?;
        tokio::fs::rename(&staging, path).await.map_err(failed)?;
        Ok(())
    }
}

#[async_trait]
impl QueryService for LocalQueryService {
    async fn start_query(&self, request: &QueryRequest) -> Result<ExecutionId, QueryError> {
        if request.query.trim().is_empty() {
            return Err(QueryError::RequestValidation("query string is empty".to_string()));
        }
        if !self.databases.contains(&request.database) {
            return Err(QueryError::ResourceNotFound(format!(
                "Database {} does not exist",
                request.database
            )));
        }

        let id = ExecutionId(format!(
            "local-{:08}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        let execution = self.run(request).await?;
        let _ = self.executions.lock().await.insert(id.clone(), execution);
        Ok(id)
    }

    /// Executions without a row set are forgotten once their terminal state
    /// has been reported
    async fn query_status(&self, id: &ExecutionId) -> Result<QueryStatus, QueryError> {
        let mut executions = self.executions.lock().await;
        match executions.remove(id) {
            Some(execution @ Execution::Succeeded { .. }) => {
                let _ = executions.insert(id.clone(), execution);
                Ok(QueryStatus::new(QueryState::Succeeded))
            }
            Some(Execution::Applied) => Ok(QueryStatus::new(QueryState::Succeeded)),
            Some(Execution::Failed(reason)) => {
                Ok(QueryStatus::with_reason(QueryState::Failed, reason))
            }
            None => Err(QueryError::ResourceNotFound(format!(
                "Query execution {id} was not found"
            ))),
        }
    }

    /// Result sets are dropped once their last page has been served
    async fn result_page(
        &self,
        id: &ExecutionId,
        next_token: Option<&str>,
        max_results: usize,
    ) -> Result<ResultPage, QueryError> {
        let mut executions = self.executions.lock().await;
        let (columns, rows) = match executions.get(id) {
            Some(Execution::Succeeded { columns, rows }) => (columns, rows),
            Some(Execution::Applied | Execution::Failed(_)) => {
                return Err(QueryError::RequestValidation(format!(
                    "Query {id} has no result set"
                )));
            }
            None => {
                return Err(QueryError::ResourceNotFound(format!(
                    "Query execution {id} was not found"
                )));
            }
        };

        let offset = match next_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                QueryError::RequestValidation(format!("invalid pagination token {token}"))
            })?,
            None => 0,
        };

        // Row 0 of the virtual result is the header, as in Athena
        let total = rows.len() + 1;
        let end = offset.saturating_add(max_results.max(1)).min(total);
        let mut page_rows = Vec::with_capacity(end.saturating_sub(offset));
        for position in offset..end {
            if position == 0 {
                page_rows.push(columns.iter().map(|c| Some(c.clone())).collect());
            } else {
                page_rows.push(rows[position - 1].clone());
            }
        }

        let page = ResultPage {
            columns: columns.clone(),
            rows: page_rows,
            next_token: (end < total).then(|| end.to_string()),
        };
        if page.next_token.is_none() {
            let _ = executions.remove(id);
        }
        Ok(page)
    }
}

/// Database and table of a possibly qualified, possibly quoted table name
fn table_ref(default_database: &str, name: &str) -> (String, String) {
    let name: String = name.chars().filter(|c| !matches!(c, '`' | '"')).collect();
    match name.split_once('.') {
        Some((database, table)) => (database.to_string(), table.to_string()),
        None => (default_database.to_string(), name),
    }
}

/// Map DataFusion failures onto the query error taxonomy
fn classify(e: DataFusionError) -> QueryError {
    let message = e.to_string();
    match e.find_root() {
        DataFusionError::SQL(..)
        | DataFusionError::Plan(..)
        | DataFusionError::SchemaError(..)
        | DataFusionError::NotImplemented(..) => QueryError::RequestValidation(message),
        DataFusionError::IoError(..) | DataFusionError::ObjectStore(..) => {
            QueryError::TransientService(message)
        }
        _ => QueryError::Unknown(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_ddl_pattern() {
        let caps = ADD_PARTITION
            .captures(
                "\nALTER TABLE shopify_daily_stats ADD IF NOT EXISTS\n  PARTITION (partition_date = '2024-01-01')\n",
            )
            .unwrap();
        assert_eq!(&caps[1], "shopify_daily_stats");
        assert!(caps.get(2).is_some());
        assert_eq!(&caps[3], "partition_date");
        assert_eq!(&caps[4], "2024-01-01");

        assert!(ADD_PARTITION.captures("SELECT 1").is_none());
    }

    #[tokio::test]
    async fn test_unknown_database_is_not_found() {
        let service = LocalQueryService::new();
        let request = QueryRequest {
            query: "SELECT 1".to_string(),
            database: "nope".to_string(),
            output_location: String::new(),
        };
        assert!(matches!(
            service.start_query(&request).await,
            Err(QueryError::ResourceNotFound(_))
        ));
    }

    fn request(database: &str, query: &str) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
            database: database.to_string(),
            output_location: String::new(),
        }
    }

    async fn state_of(service: &LocalQueryService, database: &str, query: &str) -> QueryState {
        let id = service.start_query(&request(database, query)).await.unwrap();
        service.query_status(&id).await.unwrap().state
    }

    const CREATE_STATS: &str = "CREATE EXTERNAL TABLE IF NOT EXISTS `stats` (\n  order_date string,\n  total_product_revenue double\n)\nPARTITIONED BY (partition_date string)\nLOCATION 's3://bucket/shopify/daily_stats/'";

    #[test]
    fn test_table_ddl_pattern() {
        let caps = CREATE_TABLE.captures(CREATE_STATS).unwrap();
        assert!(caps.get(1).is_some());
        assert_eq!(table_ref("analytics", &caps[2]), ("analytics".to_string(), "stats".to_string()));

        let caps = CREATE_TABLE
            .captures("create table `prymal-analytics`.`daily` (a int)")
            .unwrap();
        assert!(caps.get(1).is_none());
        assert_eq!(
            table_ref("other", &caps[2]),
            ("prymal-analytics".to_string(), "daily".to_string())
        );
    }

    #[tokio::test]
    async fn test_partition_registration_is_recorded_once() {
        let mut service = LocalQueryService::new();
        service.register_database("analytics");
        let add = "ALTER TABLE stats ADD PARTITION (partition_date = '2024-01-01')";

        assert_eq!(state_of(&service, "analytics", CREATE_STATS).await, QueryState::Succeeded);
        assert_eq!(service.tables("analytics").await, vec!["stats".to_string()]);

        assert_eq!(state_of(&service, "analytics", add).await, QueryState::Succeeded);
        assert_eq!(state_of(&service, "analytics", add).await, QueryState::Failed);
        assert_eq!(
            state_of(
                &service,
                "analytics",
                "ALTER TABLE stats ADD IF NOT EXISTS PARTITION (partition_date = '2024-01-01')"
            )
            .await,
            QueryState::Succeeded
        );

        assert_eq!(
            service.partitions("analytics", "stats").await,
            vec!["partition_date=2024-01-01".to_string()]
        );
    }

    #[tokio::test]
    async fn test_partition_of_unknown_table_fails() {
        let mut service = LocalQueryService::new();
        service.register_database("analytics");

        let id = service
            .start_query(&request(
                "analytics",
                "ALTER TABLE missing ADD IF NOT EXISTS PARTITION (partition_date = '2024-01-01')",
            ))
            .await
            .unwrap();
        let status = service.query_status(&id).await.unwrap();
        assert_eq!(status.state, QueryState::Failed);
        assert!(status.reason.unwrap().contains("analytics.missing not found"));
        assert!(service.partitions("analytics", "missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_create_table_twice() {
        let mut service = LocalQueryService::new();
        service.register_database("analytics");
        let plain = "CREATE TABLE stats (a int)";

        assert_eq!(state_of(&service, "analytics", plain).await, QueryState::Succeeded);
        assert_eq!(state_of(&service, "analytics", plain).await, QueryState::Failed);
        assert_eq!(state_of(&service, "analytics", CREATE_STATS).await, QueryState::Succeeded);
        assert_eq!(
            state_of(&service, "analytics", "CREATE TABLE nowhere.stats (a int)").await,
            QueryState::Failed
        );
    }

    #[tokio::test]
    async fn test_catalog_survives_a_new_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("catalog.yaml");

        let mut first = LocalQueryService::new()
            .with_catalog_file(&path)
            .await
            .unwrap();
        first.register_database("analytics");
        assert_eq!(state_of(&first, "analytics", CREATE_STATS).await, QueryState::Succeeded);
        assert_eq!(
            state_of(
                &first,
                "analytics",
                "ALTER TABLE stats ADD IF NOT EXISTS PARTITION (partition_date = '2024-01-01')"
            )
            .await,
            QueryState::Succeeded
        );
        assert!(path.exists());

        let second = LocalQueryService::new()
            .with_catalog_file(&path)
            .await
            .unwrap();
        assert_eq!(
            second.partitions("analytics", "stats").await,
            vec!["partition_date=2024-01-01".to_string()]
        );
        // Databases recorded in the file are known without registering them
        assert_eq!(
            state_of(
                &second,
                "analytics",
                "ALTER TABLE stats ADD IF NOT EXISTS PARTITION (partition_date = '2024-01-02')"
            )
            .await,
            QueryState::Succeeded
        );

        let third = LocalQueryService::new()
            .with_catalog_file(&path)
            .await
            .unwrap();
        assert_eq!(third.partitions("analytics", "stats").await.len(), 2);
        let recorded = std::fs::read_to_string(&path).unwrap();
        assert!(recorded.contains("partition_date=2024-01-02"));
    }

    #[tokio::test]
    async fn test_corrupt_catalog_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, "databases: [not, a, map]").unwrap();
        assert!(LocalQueryService::new().with_catalog_file(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_select_results_are_paged_with_header() {
        let mut service = LocalQueryService::new();
        service.register_database("db");
        let id = service
            .start_query(&QueryRequest {
                query: "SELECT column1 AS n, column2 AS s FROM (VALUES (1, 'a'), (2, 'b'), (3, NULL))"
                    .to_string(),
                database: "db".to_string(),
                output_location: String::new(),
            })
            .await
            .unwrap();

        let first = service.result_page(&id, None, 2).await.unwrap();
        assert_eq!(first.columns, vec!["n".to_string(), "s".to_string()]);
        assert_eq!(first.rows[0], vec![Some("n".to_string()), Some("s".to_string())]);
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let second = service.result_page(&id, Some("2"), 2).await.unwrap();
        assert_eq!(second.rows.len(), 2);
        assert_eq!(second.rows[1], vec![Some("3".to_string()), None]);
        assert_eq!(second.next_token, None);

        // The result set is released after its last page
        assert!(matches!(
            service.result_page(&id, None, 2).await,
            Err(QueryError::ResourceNotFound(_))
        ));
        assert!(service.executions.lock().await.is_empty());
    }
}
