// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use chrono::{DateTime, NaiveDate, Utc};
use dailystats::metrics::daily_stats_batch;
use dailystats::{DailyStatsJob, TargetPartition};
use diagnostics::*;

/// Options for one `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Day to compute; yesterday (UTC) when absent
    pub date: Option<NaiveDate>,
    /// Stop before publishing and print the result instead
    pub dry_run: bool,
    /// With `dry_run`, print the exact CSV payload rather than a table
    pub csv: bool,
}

/// Compute and publish one day of stats, or preview it with `dry_run`.
///
/// Errors keep the [`dailystats::JobError`] as their source so the caller
/// can tell a pending catalog update apart from a failed run.
pub async fn run_command<W: Write>(
    job: &DailyStatsJob,
    args: &RunArgs,
    now: DateTime<Utc>,
    out: &mut W,
) -> Result<()> {
    let target = TargetPartition::resolve(now, args.date);

    if args.dry_run {
        let dry = job
            .dry_run(target)
            .await
            .with_context(|| format!("Dry run for {target} failed"))?;
        let key = dry.location.key.as_str();
        info!("Dry run complete, would publish to {key}");

        if args.csv {
            out.write_all(&dry.csv)?;
        } else {
            let batch = daily_stats_batch(&dry.report.stats)?;
            writeln!(out, "{}", pretty_format_batches(&[batch])?)?;
            writeln!(out, "Would publish to {key}")?;
        }
        return Ok(());
    }

    let summary = job
        .run(target)
        .await
        .with_context(|| format!("Daily stats run for {target} failed"))?;

    writeln!(
        out,
        "Published {} rows for {target} to {} ({} bytes, {} line items, {} rejected)",
        summary.stats_rows,
        summary.receipt.key,
        summary.receipt.bytes,
        summary.source_rows,
        summary.rejected_rows
    )?;
    Ok(())
}
