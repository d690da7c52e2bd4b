// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Daily order metrics.
//!
//! The pipeline is a chain of pure steps over the raw line-item table:
//!
//! 1. parse and validate rows ([`enrich::parse_line_items`]), counting rejects
//! 2. derive per-row fields, including each customer's first order date
//! 3. group by order date, then join the new and repeat customer segments
//!
//! The result is one [`DailyStats`] row per order date, ascending.

mod aggregate;
mod batch;
mod enrich;

pub use aggregate::average_order_value;
pub use batch::{DAILY_STATS_COLUMNS, daily_stats_batch, render_csv};
pub use enrich::{CUTOFF_DAYS, EnrichedLineItem, LineItem, parse_amount, parse_order_date};

use crate::error::MetricsError;
use crate::table::Table;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Earliest known order date per customer email, from before the batch
pub type CustomerHistory = HashMap<String, NaiveDate>;

/// Summary for one order date
#[derive(Debug, Clone, PartialEq)]
pub struct DailyStats {
    pub order_date: NaiveDate,
    pub total_product_revenue: f64,
    pub total_order_count: u64,
    pub total_customer_count: u64,
    /// `None` when there are no orders
    pub daily_aov: Option<f64>,
    pub new_customer_count: u64,
    pub new_customer_spend: f64,
    pub repeat_customer_count: u64,
    pub repeat_customer_spend: f64,
}

/// Why a source row was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectReason {
    MissingOrderId,
    MissingEmail,
    InvalidOrderDate,
    InvalidQuantity,
    InvalidPrice,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingOrderId => "missing order_id",
            Self::MissingEmail => "missing email",
            Self::InvalidOrderDate => "invalid order_date",
            Self::InvalidQuantity => "invalid quantity",
            Self::InvalidPrice => "invalid price",
        })
    }
}

/// Rejected row counts by reason
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rejections {
    counts: BTreeMap<RejectReason, usize>,
}

impl Rejections {
    pub fn record(&mut self, reason: RejectReason) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    #[must_use]
    pub fn count(&self, reason: RejectReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RejectReason, usize)> + '_ {
        self.counts.iter().map(|(reason, count)| (*reason, *count))
    }
}

/// Everything the pipeline produced for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsReport {
    pub stats: Vec<DailyStats>,
    pub line_items: Vec<EnrichedLineItem>,
    pub rejections: Rejections,
}

impl MetricsReport {
    /// Earliest and latest order date among accepted rows
    #[must_use]
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.stats.first()?.order_date;
        let last = self.stats.last()?.order_date;
        Some((first, last))
    }
}

/// Compute daily stats with first orders judged within the batch alone
pub fn compute_daily_stats(table: &Table) -> Result<MetricsReport, MetricsError> {
    compute_daily_stats_with_history(table, &CustomerHistory::new())
}

/// Compute daily stats, treating `history` as orders placed before the batch
pub fn compute_daily_stats_with_history(
    table: &Table,
    history: &CustomerHistory,
) -> Result<MetricsReport, MetricsError> {
    let (items, rejections) = enrich::parse_line_items(table)?;
    let line_items = enrich::enrich(items, history);
    let stats = aggregate::daily_stats(&line_items);

    Ok(MetricsReport {
        stats,
        line_items,
        rejections,
    })
}

/// Read `email, first_order_date` rows into a history map.
///
/// Rows with a missing email or unparseable date are skipped; duplicates
/// keep the earliest date.
pub fn customer_history_from_table(table: &Table) -> Result<CustomerHistory, MetricsError> {
    let email = table
        .column_index("email")
        .ok_or_else(|| MetricsError::MissingColumn("email".to_string()))?;
    let first = table
        .column_index("first_order_date")
        .ok_or_else(|| MetricsError::MissingColumn("first_order_date".to_string()))?;

    let mut history = CustomerHistory::new();
    for row in 0..table.num_rows() {
        let Some(address) = table.value(row, email).map(str::trim).filter(|e| !e.is_empty())
        else {
            continue;
        };
        let Some(date) = table.value(row, first).and_then(parse_order_date) else {
            continue;
        };
        history
            .entry(address.to_string())
            .and_modify(|d| *d = (*d).min(date))
            .or_insert(date);
    }
    Ok(history)
}
