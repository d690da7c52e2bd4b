// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use anyhow::{Context, Result};
use dailystats::Config;

/// Print the resolved configuration. Credentials never reach the YAML and
/// are summarized through their redacting `Debug` form.
pub fn show_config_command<W: Write>(config: &Config, out: &mut W) -> Result<()> {
    let yaml = serde_yaml_ng::to_string(config).context("Failed to render configuration")?;
    write!(out, "{yaml}")?;
    writeln!(out, "# credentials: {:?}", config.credentials)?;
    Ok(())
}
