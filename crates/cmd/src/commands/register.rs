// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dailystats::{DailyStatsJob, TargetPartition};

/// Register an already published partition in the catalog
pub async fn register_partition_command<W: Write>(
    job: &DailyStatsJob,
    date: NaiveDate,
    out: &mut W,
) -> Result<()> {
    let target = TargetPartition::for_date(date);
    job.register_partition(target)
        .await
        .with_context(|| format!("Failed to register partition {target}"))?;
    writeln!(out, "Registered partition {target}")?;
    Ok(())
}
