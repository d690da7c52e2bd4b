// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use dailystats::DailyStatsJob;
use diagnostics::*;

/// Create the published table by running a DDL file against the target
/// database
pub async fn create_table_command<W: Write>(
    job: &DailyStatsJob,
    sql_path: &Path,
    out: &mut W,
) -> Result<()> {
    let display = sql_path.display().to_string();
    let ddl = std::fs::read_to_string(sql_path)
        .with_context(|| format!("Failed to read DDL file {display}"))?;
    debug!("Table DDL from {display}: {ddl}");

    job.create_table(&ddl)
        .await
        .with_context(|| format!("Failed to run table DDL from {display}"))?;
    writeln!(out, "Applied table DDL from {display}")?;
    Ok(())
}
