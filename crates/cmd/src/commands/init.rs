// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use dailystats::config::create_example_config;
use diagnostics::*;

/// Write an example configuration file, refusing to overwrite one
pub fn init_command<W: Write>(config_path: &Path, out: &mut W) -> Result<()> {
    let display = config_path.display().to_string();
    if config_path.exists() {
        return Err(anyhow!(
            "Configuration file already exists: {display}. Delete it first to create a new one."
        ));
    }

    create_example_config(config_path)
        .with_context(|| format!("Failed to create configuration file: {display}"))?;
    info!("Created example configuration file: {display}");

    writeln!(out, "Created example configuration file: {display}")?;
    writeln!(out, "Edit it to point at your lake and target store:")?;
    writeln!(out, "  - source.lake_path: root of the year=/month=/day= line item lake")?;
    writeln!(out, "  - target.url: s3://bucket, file:///path, or a local directory")?;
    writeln!(out, "Then create the stats table with: dailystats create-table --sql <file>")?;
    writeln!(
        out,
        "Credentials for s3:// targets come from AWS_ACCESS_KEY and AWS_ACCESS_SECRET."
    )?;
    Ok(())
}
