// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use cmd::commands::{
    RunArgs, create_table_command, init_command, register_partition_command, run_command,
    show_config_command,
};
use cmd::common::{
    DEFAULT_CONFIG, build_job, config_path_with_override, load_resolved_config, parse_date,
};
use dailystats::JobError;
use diagnostics::*;

/// Exit status when data was published but the catalog was not updated
const EXIT_CATALOG_PENDING: u8 = 2;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "dailystats")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example configuration file
    Init {
        /// Path of the file to create
        #[arg(default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Compute daily stats for one day and publish them
    Run {
        /// Configuration file (defaults to $DAILYSTATS_CONFIG, then dailystats.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Day to compute as YYYY-MM-DD, yesterday (UTC) when omitted
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Compute and print the result without publishing
        #[arg(long)]
        dry_run: bool,
        /// With --dry-run, print the CSV payload instead of a table
        #[arg(long, requires = "dry_run")]
        csv: bool,
    },
    /// Create the published table in the catalog from a DDL file
    CreateTable {
        /// Configuration file (defaults to $DAILYSTATS_CONFIG, then dailystats.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// File holding the CREATE TABLE statement
        #[arg(long)]
        sql: PathBuf,
    },
    /// Register an already published partition in the catalog
    RegisterPartition {
        /// Configuration file (defaults to $DAILYSTATS_CONFIG, then dailystats.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Partition date as YYYY-MM-DD
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,
    },
    /// Print the resolved configuration with secrets redacted
    ShowConfig {
        /// Configuration file (defaults to $DAILYSTATS_CONFIG, then dailystats.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Init { config } => init_command(&config, &mut stdout),
        Commands::Run {
            config,
            date,
            dry_run,
            csv,
        } => {
            let config = load_resolved_config(&config_path_with_override(config))?;
            let job = build_job(&config).await?;
            let args = RunArgs { date, dry_run, csv };
            run_command(&job, &args, Utc::now(), &mut stdout).await
        }
        Commands::CreateTable { config, sql } => {
            let config = load_resolved_config(&config_path_with_override(config))?;
            let job = build_job(&config).await?;
            create_table_command(&job, &sql, &mut stdout).await
        }
        Commands::RegisterPartition { config, date } => {
            let config = load_resolved_config(&config_path_with_override(config))?;
            let job = build_job(&config).await?;
            register_partition_command(&job, date, &mut stdout).await
        }
        Commands::ShowConfig { config } => {
            let config = load_resolved_config(&config_path_with_override(config))?;
            show_config_command(&config, &mut stdout)
        }
    }
}

/// Catalog-only failures get their own status so a scheduler can retry
/// just `register-partition`
fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<JobError>() {
        Some(job_error) if job_error.is_catalog_pending() => EXIT_CATALOG_PENDING,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_diagnostics();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{e:#}");
            error!("{message}");
            let code = exit_code(&e);
            if code == EXIT_CATALOG_PENDING {
                warn!("Data published, catalog not yet consistent; retry register-partition");
            }
            let _ = writeln!(std::io::stderr(), "Error: {message}");
            ExitCode::from(code)
        }
    }
}
