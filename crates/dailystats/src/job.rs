// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! The daily run: query, compute, publish, register.

use crate::catalog::CatalogUpdater;
use crate::config::{Config, FirstOrderSource};
use crate::error::{JobError, PublishError, QueryError};
use crate::metrics::{
    CustomerHistory, MetricsReport, compute_daily_stats_with_history,
    customer_history_from_table, render_csv,
};
use crate::partition::{PartitionLocation, TargetPartition};
use crate::publish::{PublishReceipt, Publisher};
use crate::query::{PollPolicy, QueryExecutor, QueryService};
use diagnostics::*;
use object_store::ObjectStore;
use std::sync::Arc;

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub partition: TargetPartition,
    pub source_rows: usize,
    pub rejected_rows: usize,
    pub stats_rows: usize,
    pub receipt: PublishReceipt,
}

/// Outcome of a dry run: everything up to, but not including, the publish
#[derive(Debug, Clone, PartialEq)]
pub struct DryRun {
    pub partition: TargetPartition,
    pub location: PartitionLocation,
    pub report: MetricsReport,
    pub csv: Vec<u8>,
}

/// Computes and publishes one day of stats
pub struct DailyStatsJob {
    executor: QueryExecutor,
    publisher: Publisher,
    catalog: CatalogUpdater,
    domain: String,
    source_database: String,
    source_table: String,
    first_order_source: FirstOrderSource,
    file_stem: String,
    extension: String,
}

impl DailyStatsJob {
    #[must_use]
    pub fn new(
        config: &Config,
        service: Arc<dyn QueryService>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let executor = QueryExecutor::new(service, config.source.result_location.clone())
            .with_page_size(config.source.page_size)
            .with_poll_policy(PollPolicy::from(&config.polling));
        let catalog = CatalogUpdater::new(
            executor.clone(),
            config.target.database.clone(),
            config.target.table.clone(),
        );

        Self {
            executor,
            publisher: Publisher::new(store),
            catalog,
            domain: config.domain.clone(),
            source_database: config.source.database.clone(),
            source_table: config.source.table.clone(),
            first_order_source: config.source.first_order_source,
            file_stem: config.target.file_stem.clone(),
            extension: config.target.extension.clone(),
        }
    }

    /// Where `target`'s stats file is published
    #[must_use]
    pub fn location(&self, target: TargetPartition) -> PartitionLocation {
        target.location(&self.domain, &self.file_stem, &self.extension)
    }

    /// Query the source partition and compute its stats
    pub async fn compute(
        &self,
        target: TargetPartition,
    ) -> Result<(MetricsReport, usize), JobError> {
        let date = target.to_string();
        info!("Computing daily stats for {date}");

        let query = target.source_query(&self.source_table);
        let table = self
            .executor
            .execute(&query, &self.source_database)
            .await
            .map_err(JobError::Query)?;
        let source_rows = table.num_rows();
        info!("Fetched {source_rows} line items for {date}");

        let history = match self.first_order_source {
            FirstOrderSource::Batch => CustomerHistory::new(),
            FirstOrderSource::LakeHistory => {
                let query = target.history_query(&self.source_table);
                let rows = self
                    .executor
                    .execute(&query, &self.source_database)
                    .await
                    .map_err(JobError::History)?;
                let history = customer_history_from_table(&rows).map_err(|e| {
                    JobError::History(QueryError::Unknown(format!(
                        "unusable customer history result: {e}"
                    )))
                })?;
                let customers = history.len();
                info!("Loaded first order dates for {customers} earlier customers");
                history
            }
        };

        let report = compute_daily_stats_with_history(&table, &history)?;
        log_report(&report);
        Ok((report, source_rows))
    }

    /// Compute and render without touching the object store or catalog
    pub async fn dry_run(&self, target: TargetPartition) -> Result<DryRun, JobError> {
        let (report, _) = self.compute(target).await?;
        let csv = render_csv(&report.stats).map_err(PublishError::from)?;
        Ok(DryRun {
            partition: target,
            location: self.location(target),
            report,
            csv,
        })
    }

    /// The full run. A catalog failure after a successful publish is
    /// [`JobError::CatalogPending`].
    pub async fn run(&self, target: TargetPartition) -> Result<RunSummary, JobError> {
        let (report, source_rows) = self.compute(target).await?;

        let location = self.location(target);
        let key = location.key.as_str();
        info!("Publishing daily stats to {key}");
        let receipt = self.publisher.publish(&report.stats, &location).await?;

        self.catalog
            .register_partition(target)
            .await
            .map_err(|source| JobError::CatalogPending {
                partition_date: target.date(),
                key: receipt.key.clone(),
                source,
            })?;

        Ok(RunSummary {
            partition: target,
            source_rows,
            rejected_rows: report.rejections.total(),
            stats_rows: report.stats.len(),
            receipt,
        })
    }

    /// Create the published table in the target catalog from `ddl`
    pub async fn create_table(&self, ddl: &str) -> Result<(), QueryError> {
        self.catalog.create_table(ddl).await
    }

    /// Retry only the catalog step for an already published partition
    pub async fn register_partition(&self, target: TargetPartition) -> Result<(), QueryError> {
        self.catalog.register_partition(target).await
    }
}

fn log_report(report: &MetricsReport) {
    let accepted = report.line_items.len();
    let rejected = report.rejections.total();
    if rejected > 0 {
        warn!("Rejected {rejected} line items, kept {accepted}");
        for (reason, count) in report.rejections.iter() {
            let reason = reason.to_string();
            warn!("{count} line items rejected: {reason}");
        }
    } else {
        debug!("Kept all {accepted} line items");
    }

    match report.date_range() {
        Some((min, max)) => {
            let min_date = min.to_string();
            let max_date = max.to_string();
            info!("Order dates range from {min_date} to {max_date}");
        }
        None => {
            warn!("No valid line items, stats file will be header only");
        }
    }
}
