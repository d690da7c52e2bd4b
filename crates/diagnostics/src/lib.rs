// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Logging setup shared by the dailystats crates.
//!
//! The level comes from `DAILYSTATS_LOG`:
//! - `off` (default) - no logs
//! - `error`, `warn` - problems only
//! - `info` - one line per pipeline stage
//! - `debug` - polling, paging and per-object detail

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable holding the log level
pub const LOG_ENV: &str = "DAILYSTATS_LOG";

static INIT: Once = Once::new();

/// Parse a level name. `None` means logging is disabled.
pub fn parse_level(value: &str) -> Result<Option<emit::Level>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "debug" => Ok(Some(emit::Level::Debug)),
        "info" => Ok(Some(emit::Level::Info)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "error" => Ok(Some(emit::Level::Error)),
        other => Err(other.to_string()),
    }
}

/// Initialize logging from `DAILYSTATS_LOG`.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_diagnostics() {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
    init_with_level(&level);
}

/// Initialize logging with an explicit level name, e.g. from a CLI flag.
pub fn init_with_level(level: &str) {
    INIT.call_once(|| {
        let min = match parse_level(level) {
            Ok(None) => return,
            Ok(Some(min)) => min,
            Err(unknown) => {
                // Bootstrap warning, the emitter is not running yet
                eprintln!("Warning: Unknown {LOG_ENV} value '{unknown}', using 'info'");
                emit::Level::Info
            }
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(min))
            .init();

        // The runtime must outlive every emitting thread
        std::mem::forget(rt);
    });
}

// Re-exported directly rather than wrapped in `macro_rules!`: a wrapper
// changes the hygiene of template holes like `{value}`, so locals at the
// call site would not resolve.

/// Log pipeline progress: stage starts, counts, keys written.
pub use emit::info;

/// Log detail: poll states, page sizes, individual objects.
pub use emit::debug;

/// Log recoverable conditions such as rejected rows or stale objects.
pub use emit::warn;

/// Log failures that end a stage.
pub use emit::error;

/// Re-export the init function for convenience
pub use init_diagnostics as init;
