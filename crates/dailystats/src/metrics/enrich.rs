// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Row parsing and per-row derived fields

use super::{CustomerHistory, Rejections, RejectReason};
use crate::error::MetricsError;
use crate::table::Table;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// Days after a first order that still count as the acquisition window
pub const CUTOFF_DAYS: u64 = 60;

/// One validated order line
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub order_id: String,
    pub email: String,
    pub order_date: NaiveDate,
    pub quantity: f64,
    pub price: f64,
    pub sku: Option<String>,
}

/// A line item with every derived field attached
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedLineItem {
    pub item: LineItem,
    /// quantity × price
    pub product_rev: f64,
    /// `%Y-%W`, Monday-based week of the year
    pub week: String,
    pub first_order_date: NaiveDate,
    /// Days between this order and the customer's first order
    pub age: i64,
    pub cutoff_60_days: NaiveDate,
    /// `%Y-%m`
    pub first_order_month: String,
    /// This line is on the customer's first order date
    pub first_order_fl: bool,
}

struct Columns {
    order_id: usize,
    email: usize,
    order_date: usize,
    quantity: usize,
    price: usize,
    sku: Option<usize>,
}

impl Columns {
    fn locate(table: &Table) -> Result<Self, MetricsError> {
        let required = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| MetricsError::MissingColumn(name.to_string()))
        };
        Ok(Self {
            order_id: required("order_id")?,
            email: required("email")?,
            order_date: required("order_date")?,
            quantity: required("quantity")?,
            price: required("price")?,
            sku: table.column_index("sku"),
        })
    }
}

/// Normalize a source timestamp to its calendar date.
///
/// Offsets are kept, so an RFC 3339 value yields the date local to its own
/// offset rather than the UTC date.
#[must_use]
pub fn parse_order_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.date_naive());
    }
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.date_naive());
    }

    let naive = value.strip_suffix(" UTC").unwrap_or(value);
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(naive, format).ok())
        .map(|ts| ts.date())
}

/// Parse a non-negative, finite amount
#[must_use]
pub fn parse_amount(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn text(table: &Table, row: usize, column: usize) -> Option<String> {
    table
        .value(row, column)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validate every row, counting the ones that cannot be used
pub(crate) fn parse_line_items(
    table: &Table,
) -> Result<(Vec<LineItem>, Rejections), MetricsError> {
    let columns = Columns::locate(table)?;
    let mut items = Vec::with_capacity(table.num_rows());
    let mut rejections = Rejections::default();

    for row in 0..table.num_rows() {
        let Some(order_id) = text(table, row, columns.order_id) else {
            rejections.record(RejectReason::MissingOrderId);
            continue;
        };
        let Some(email) = text(table, row, columns.email) else {
            rejections.record(RejectReason::MissingEmail);
            continue;
        };
        let Some(order_date) = table
            .value(row, columns.order_date)
            .and_then(parse_order_date)
        else {
            rejections.record(RejectReason::InvalidOrderDate);
            continue;
        };
        let Some(quantity) = table.value(row, columns.quantity).and_then(parse_amount) else {
            rejections.record(RejectReason::InvalidQuantity);
            continue;
        };
        let Some(price) = table.value(row, columns.price).and_then(parse_amount) else {
            rejections.record(RejectReason::InvalidPrice);
            continue;
        };

        items.push(LineItem {
            order_id,
            email,
            order_date,
            quantity,
            price,
            sku: columns.sku.and_then(|c| text(table, row, c)),
        });
    }

    Ok((items, rejections))
}

/// Earliest order date per customer: the batch minimum, lowered by any
/// earlier date known from history
pub(crate) fn first_order_dates(
    items: &[LineItem],
    history: &CustomerHistory,
) -> HashMap<String, NaiveDate> {
    let mut first: HashMap<String, NaiveDate> = HashMap::new();
    for item in items {
        first
            .entry(item.email.clone())
            .and_modify(|d| *d = (*d).min(item.order_date))
            .or_insert(item.order_date);
    }
    for (email, date) in first.iter_mut() {
        if let Some(seen) = history.get(email) {
            *date = (*date).min(*seen);
        }
    }
    first
}

/// Attach revenue, week, first-order and age fields to every line
pub(crate) fn enrich(items: Vec<LineItem>, history: &CustomerHistory) -> Vec<EnrichedLineItem> {
    let first = first_order_dates(&items, history);

    items
        .into_iter()
        .map(|item| {
            // Every email has an entry, the map was built from these items
            let first_order_date = first.get(&item.email).copied().unwrap_or(item.order_date);
            let cutoff_60_days = first_order_date
                .checked_add_days(Days::new(CUTOFF_DAYS))
                .unwrap_or(first_order_date);

            EnrichedLineItem {
                product_rev: item.quantity * item.price,
                week: item.order_date.format("%Y-%W").to_string(),
                age: (item.order_date - first_order_date).num_days(),
                cutoff_60_days,
                first_order_month: first_order_date.format("%Y-%m").to_string(),
                first_order_fl: item.order_date == first_order_date,
                first_order_date,
                item,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_order_date_formats() {
        assert_eq!(parse_order_date("2024-01-01"), Some(date(2024, 1, 1)));
        assert_eq!(
            parse_order_date("2024-01-01 23:59:59.000"),
            Some(date(2024, 1, 1))
        );
        assert_eq!(
            parse_order_date("2024-01-01 23:59:59.000 UTC"),
            Some(date(2024, 1, 1))
        );
        assert_eq!(
            parse_order_date("2024-01-01T10:00:00"),
            Some(date(2024, 1, 1))
        );
        // Date local to the offset, not UTC
        assert_eq!(
            parse_order_date("2024-01-01T22:30:00-05:00"),
            Some(date(2024, 1, 1))
        );
        assert_eq!(parse_order_date("01/02/2024"), None);
        assert_eq!(parse_order_date("  "), None);
    }

    #[test]
    fn test_amounts() {
        assert_eq!(parse_amount(" 2 "), Some(2.0));
        assert_eq!(parse_amount("5.25"), Some(5.25));
        assert_eq!(parse_amount("-1"), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("two"), None);
    }

    #[test]
    fn test_rows_are_rejected_by_reason() {
        let table = Table::from_rows(
            &["order_id", "email", "order_date", "quantity", "price"],
            &[
                ["o1", "a@x.com", "2024-01-01", "1", "10"],
                ["", "a@x.com", "2024-01-01", "1", "10"],
                ["o3", "b@x.com", "yesterday", "1", "10"],
                ["o4", "b@x.com", "2024-01-01", "x", "10"],
                ["o5", "b@x.com", "2024-01-01", "1", "-3"],
            ],
        );
        let (items, rejections) = parse_line_items(&table).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(rejections.total(), 4);
        assert_eq!(rejections.count(RejectReason::MissingOrderId), 1);
        assert_eq!(rejections.count(RejectReason::InvalidOrderDate), 1);
        assert_eq!(rejections.count(RejectReason::InvalidQuantity), 1);
        assert_eq!(rejections.count(RejectReason::InvalidPrice), 1);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let table = Table::from_rows(&["order_id", "email"], &[["o1", "a@x.com"]]);
        assert_eq!(
            parse_line_items(&table).unwrap_err(),
            MetricsError::MissingColumn("order_date".to_string())
        );
    }

    #[test]
    fn test_derived_fields() {
        let items = vec![
            LineItem {
                order_id: "o1".to_string(),
                email: "a@x.com".to_string(),
                order_date: date(2024, 1, 1),
                quantity: 2.0,
                price: 5.0,
                sku: None,
            },
            LineItem {
                order_id: "o2".to_string(),
                email: "a@x.com".to_string(),
                order_date: date(2024, 1, 8),
                quantity: 1.0,
                price: 10.0,
                sku: Some("SKU-1".to_string()),
            },
        ];
        let enriched = enrich(items, &CustomerHistory::new());

        assert_eq!(enriched[0].product_rev, 10.0);
        assert_eq!(enriched[0].week, "2024-01");
        assert!(enriched[0].first_order_fl);
        assert_eq!(enriched[0].age, 0);
        assert_eq!(enriched[0].cutoff_60_days, date(2024, 3, 1));
        assert_eq!(enriched[0].first_order_month, "2024-01");

        assert_eq!(enriched[1].first_order_date, date(2024, 1, 1));
        assert!(!enriched[1].first_order_fl);
        assert_eq!(enriched[1].age, 7);
        assert_eq!(enriched[1].week, "2024-02");
    }

    #[test]
    fn test_history_moves_first_order_earlier() {
        let items = vec![LineItem {
            order_id: "o1".to_string(),
            email: "a@x.com".to_string(),
            order_date: date(2024, 1, 10),
            quantity: 1.0,
            price: 1.0,
            sku: None,
        }];
        let history: CustomerHistory = [("a@x.com".to_string(), date(2023, 12, 1))]
            .into_iter()
            .collect();

        let enriched = enrich(items, &history);
        assert_eq!(enriched[0].first_order_date, date(2023, 12, 1));
        assert!(!enriched[0].first_order_fl);
        assert_eq!(enriched[0].age, 40);
    }
}
