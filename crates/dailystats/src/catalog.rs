// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Table creation and partition registration in the metadata catalog

use crate::error::QueryError;
use crate::partition::TargetPartition;
use crate::query::QueryExecutor;
use diagnostics::*;

/// Adds daily partitions to the published table's catalog entry
#[derive(Clone)]
pub struct CatalogUpdater {
    executor: QueryExecutor,
    database: String,
    table: String,
}

impl CatalogUpdater {
    #[must_use]
    pub fn new(
        executor: QueryExecutor,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            database: database.into(),
            table: table.into(),
        }
    }

    /// Run a table DDL statement, such as the one creating the stats table,
    /// against the target database
    pub async fn create_table(&self, ddl: &str) -> Result<(), QueryError> {
        if ddl.trim().is_empty() {
            return Err(QueryError::RequestValidation(
                "table DDL is empty".to_string(),
            ));
        }
        let database = self.database.as_str();
        info!("Running table DDL against {database}");

        self.executor
            .execute_no_result(ddl, database)
            .await
            .inspect_err(|e| {
                let reason = e.to_string();
                error!("Table DDL failed in {database}: {reason}");
            })
    }

    /// DDL that makes `partition` visible to queries; safe to repeat
    #[must_use]
    pub fn statement(&self, partition: TargetPartition) -> String {
        format!(
            "ALTER TABLE {} ADD IF NOT EXISTS PARTITION (partition_date = '{partition}')",
            self.table
        )
    }

    pub async fn register_partition(&self, partition: TargetPartition) -> Result<(), QueryError> {
        let statement = self.statement(partition);
        let table = self.table.as_str();
        let date = partition.to_string();

        self.executor
            .execute_no_result(&statement, &self.database)
            .await
            .inspect_err(|e| {
                let reason = e.to_string();
                error!("Failed to register partition {date} of {table}: {reason}");
            })?;

        info!("Registered partition {date} of {table}");
        Ok(())
    }
}
