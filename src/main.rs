use std::process::ExitCode;

use clap::Parser;
use sqlkv::cli::{self, output, Cli};
use tracing::{debug, error};

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(c) => c,
        Err(e) => {
            output::error(&format!("Failed to load config: {e}"));
            return ExitCode::from(2);
        }
    };

    config.logging.init();
    debug!(store = %config.store_name, dialect = %config.database.dialect, "sqlkv starting");

    match cli::execute(&cli, &config) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            output::error(&format!("{e:#}"));
            ExitCode::from(2)
        }
    }
}
