// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod create_table;
pub mod init;
pub mod register;
pub mod run;
pub mod show_config;

pub use create_table::create_table_command;
pub use init::init_command;
pub use register::register_partition_command;
pub use run::{RunArgs, run_command};
pub use show_config::show_config_command;
