// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Daily order statistics for a data lake.
//!
//! One run reads a day of order line items through a [`QueryService`],
//! reduces them to one [`DailyStats`] row per order date, replaces that
//! day's partition in an object store with a CSV file, and registers the
//! partition in the metadata catalog.

pub mod catalog;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod partition;
pub mod publish;
pub mod query;
pub mod store;
pub mod table;

// Re-export key types for use in tests and the binary
pub use crate::catalog::CatalogUpdater;
pub use crate::config::{Config, FirstOrderSource, load_config};
pub use crate::error::{ConfigError, JobError, MetricsError, PublishError, QueryError};
pub use crate::job::{DailyStatsJob, DryRun, RunSummary};
pub use crate::metrics::{DailyStats, MetricsReport, compute_daily_stats};
pub use crate::partition::{PartitionLocation, TargetPartition};
pub use crate::publish::{PublishReceipt, Publisher};
pub use crate::query::{LocalQueryService, QueryExecutor, QueryService};
pub use crate::store::build_object_store;
pub use crate::table::Table;
