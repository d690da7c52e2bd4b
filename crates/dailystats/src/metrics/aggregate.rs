// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Grouping by order date and the new/repeat customer joins

use super::DailyStats;
use super::enrich::EnrichedLineItem;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};

#[derive(Default)]
struct DayTotals<'a> {
    revenue: f64,
    orders: HashSet<&'a str>,
    customers: HashSet<&'a str>,
}

#[derive(Default)]
struct SegmentTotals<'a> {
    customers: HashSet<&'a str>,
    spend: f64,
}

impl SegmentTotals<'_> {
    fn count(&self) -> u64 {
        self.customers.len() as u64
    }
}

fn base_totals(items: &[EnrichedLineItem]) -> BTreeMap<NaiveDate, DayTotals<'_>> {
    let mut days: BTreeMap<NaiveDate, DayTotals<'_>> = BTreeMap::new();
    for line in items {
        let day = days.entry(line.item.order_date).or_default();
        day.revenue += line.product_rev;
        let _ = day.orders.insert(line.item.order_id.as_str());
        let _ = day.customers.insert(line.item.email.as_str());
    }
    days
}

/// Aggregate the lines whose first-order flag equals `first_order`
fn segment_totals(
    items: &[EnrichedLineItem],
    first_order: bool,
) -> BTreeMap<NaiveDate, SegmentTotals<'_>> {
    let mut days: BTreeMap<NaiveDate, SegmentTotals<'_>> = BTreeMap::new();
    for line in items.iter().filter(|l| l.first_order_fl == first_order) {
        let day = days.entry(line.item.order_date).or_default();
        let _ = day.customers.insert(line.item.email.as_str());
        day.spend += line.product_rev;
    }
    days
}

/// Revenue per order, undefined without orders
#[must_use]
pub fn average_order_value(revenue: f64, orders: u64) -> Option<f64> {
    (orders > 0).then(|| revenue / orders as f64)
}

/// One row per order date, ascending, with new and repeat segments joined
/// on and defaulted to zero
pub(crate) fn daily_stats(items: &[EnrichedLineItem]) -> Vec<DailyStats> {
    let base = base_totals(items);
    let new_customers = segment_totals(items, true);
    let repeat_customers = segment_totals(items, false);

    base.into_iter()
        .map(|(order_date, day)| {
            let total_order_count = day.orders.len() as u64;
            let new = new_customers.get(&order_date);
            let repeat = repeat_customers.get(&order_date);

            DailyStats {
                order_date,
                total_product_revenue: day.revenue,
                total_order_count,
                total_customer_count: day.customers.len() as u64,
                daily_aov: average_order_value(day.revenue, total_order_count),
                new_customer_count: new.map_or(0, SegmentTotals::count),
                new_customer_spend: new.map_or(0.0, |s| s.spend),
                repeat_customer_count: repeat.map_or(0, SegmentTotals::count),
                repeat_customer_spend: repeat.map_or(0.0, |s| s.spend),
            }
        })
        .collect()
}
