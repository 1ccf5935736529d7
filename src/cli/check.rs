//! Handler for the `check` command.

use std::process::ExitCode;

use anyhow::Result;

use crate::cli::output;
use crate::store::Store;

/// Report on an opened store and round-trip to its database.
///
/// Reaching this point means the configuration validated and the table
/// exists; a failed ping is reported and exits with code 2.
pub fn execute(store: &Store) -> Result<ExitCode> {
    output::section("sqlkv check");
    output::key_value("Store:", store.name());
    output::key_value("Dialect:", store.dialect());

    let alive = store.is_alive();
    let ping = store.ping();
    output::key_value("Liveness:", if alive { "up" } else { "down" });
    if let Some(state) = store.pool_state() {
        output::key_value(
            "Pool:",
            format!(
                "{} open, {} idle",
                state.connections, state.idle_connections
            ),
        );
    }
    println!();

    match ping {
        Ok(()) => {
            output::ok("Database reachable");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            output::error(&format!("Ping failed: {err}"));
            Ok(ExitCode::from(2))
        }
    }
}
