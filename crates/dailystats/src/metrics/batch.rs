// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Arrow and CSV rendering of daily stats

use super::DailyStats;
use crate::partition::DATE_FORMAT;
use arrow_array::{ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow_csv::WriterBuilder;
use arrow_schema::{ArrowError, DataType, Field, Schema};
use std::sync::Arc;

/// Published column order
pub const DAILY_STATS_COLUMNS: [&str; 9] = [
    "order_date",
    "total_product_revenue",
    "total_order_count",
    "total_customer_count",
    "daily_aov",
    "new_customer_count",
    "new_customer_spend",
    "repeat_customer_count",
    "repeat_customer_spend",
];

fn schema() -> Schema {
    let [
        order_date,
        revenue,
        orders,
        customers,
        aov,
        new_count,
        new_spend,
        repeat_count,
        repeat_spend,
    ] = DAILY_STATS_COLUMNS;

    Schema::new(vec![
        Field::new(order_date, DataType::Utf8, false),
        Field::new(revenue, DataType::Float64, false),
        Field::new(orders, DataType::UInt64, false),
        Field::new(customers, DataType::UInt64, false),
        Field::new(aov, DataType::Float64, true),
        Field::new(new_count, DataType::UInt64, false),
        Field::new(new_spend, DataType::Float64, false),
        Field::new(repeat_count, DataType::UInt64, false),
        Field::new(repeat_spend, DataType::Float64, false),
    ])
}

/// Columnar form of `stats`, one row each, in the published column order
pub fn daily_stats_batch(stats: &[DailyStats]) -> Result<RecordBatch, ArrowError> {
    let floats = |f: fn(&DailyStats) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from_iter_values(stats.iter().map(f)))
    };
    let counts = |f: fn(&DailyStats) -> u64| -> ArrayRef {
        Arc::new(UInt64Array::from_iter_values(stats.iter().map(f)))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            stats
                .iter()
                .map(|s| s.order_date.format(DATE_FORMAT).to_string()),
        )),
        floats(|s| s.total_product_revenue),
        counts(|s| s.total_order_count),
        counts(|s| s.total_customer_count),
        Arc::new(Float64Array::from(
            stats.iter().map(|s| s.daily_aov).collect::<Vec<_>>(),
        )),
        counts(|s| s.new_customer_count),
        floats(|s| s.new_customer_spend),
        counts(|s| s.repeat_customer_count),
        floats(|s| s.repeat_customer_spend),
    ];

    RecordBatch::try_new(Arc::new(schema()), columns)
}

/// CSV bytes with a header row. An undefined AOV is an empty field.
pub fn render_csv(stats: &[DailyStats]) -> Result<Vec<u8>, ArrowError> {
    let batch = daily_stats_batch(stats)?;
    let mut buffer = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(&batch)?;
    }
    Ok(buffer)
}
