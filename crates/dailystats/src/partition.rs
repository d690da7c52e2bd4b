// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Target date resolution and the query text and storage keys derived from it

use chrono::{DateTime, Days, NaiveDate, Utc};
use std::fmt;

/// Format used for partition values and file names
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// The calendar day a run computes stats for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetPartition {
    date: NaiveDate,
}

/// Where a partition lives in the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLocation {
    /// `<domain>/daily_stats/partition_date=<date>`
    pub prefix: String,
    /// `<prefix>/<file_stem>_<date>.<extension>`
    pub key: String,
}

impl TargetPartition {
    #[must_use]
    pub fn for_date(date: NaiveDate) -> Self {
        Self { date }
    }

    /// The day before `reference`, in UTC
    #[must_use]
    pub fn yesterday_of(reference: DateTime<Utc>) -> Self {
        let today = reference.date_naive();
        let date = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        Self { date }
    }

    /// An explicit date wins over the reference instant
    #[must_use]
    pub fn resolve(reference: DateTime<Utc>, explicit: Option<NaiveDate>) -> Self {
        explicit.map_or_else(|| Self::yesterday_of(reference), Self::for_date)
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub fn year(&self) -> String {
        self.date.format("%Y").to_string()
    }

    #[must_use]
    pub fn month(&self) -> String {
        self.date.format("%m").to_string()
    }

    #[must_use]
    pub fn day(&self) -> String {
        self.date.format("%d").to_string()
    }

    /// Predicate selecting this day's hive partition of the source table
    #[must_use]
    pub fn filter_predicate(&self) -> String {
        format!(
            "year = '{}' AND month = '{}' AND day = '{}'",
            self.year(),
            self.month(),
            self.day()
        )
    }

    /// Line items for this day
    #[must_use]
    pub fn source_query(&self, table: &str) -> String {
        format!("SELECT * FROM {table} WHERE {}", self.filter_predicate())
    }

    /// Earliest order date per customer over every partition before this day
    #[must_use]
    pub fn history_query(&self, table: &str) -> String {
        format!(
            "SELECT email, MIN(order_date) AS first_order_date FROM {table} \
             WHERE concat(year, '-', month, '-', day) < '{self}' AND email IS NOT NULL \
             GROUP BY email"
        )
    }

    /// Object store location for this day's stats file
    #[must_use]
    pub fn location(&self, domain: &str, file_stem: &str, extension: &str) -> PartitionLocation {
        let prefix = format!("{domain}/daily_stats/partition_date={self}");
        let key = format!("{prefix}/{file_stem}_{self}.{extension}");
        PartitionLocation { prefix, key }
    }
}

impl fmt::Display for TargetPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date.format(DATE_FORMAT))
    }
}
