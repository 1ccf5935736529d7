//! Handlers for the data commands.

use std::process::ExitCode;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::{check, output, Commands};
use crate::store::{Entry, Store};

/// JSON shape printed by `get --json`.
#[derive(Debug, Serialize)]
struct EntryView<'a> {
    key: &'a str,
    value: String,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Entry> for EntryView<'a> {
    fn from(entry: &'a Entry) -> Self {
        Self {
            key: &entry.key,
            value: String::from_utf8_lossy(&entry.value).into_owned(),
            updated_at: entry.updated_at,
        }
    }
}

/// Execute a command against an open store.
///
/// # Errors
///
/// Returns the store error that ended the command.
pub fn execute(store: &Store, command: &Commands) -> Result<ExitCode> {
    match command {
        Commands::Put(args) => {
            store.put(&args.key, args.value.as_bytes())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Get(args) if args.json => match store.entry(&args.key)? {
            Some(entry) => {
                println!("{}", serde_json::to_string(&EntryView::from(&entry))?);
                Ok(ExitCode::SUCCESS)
            }
            None => not_found(&args.key),
        },
        Commands::Get(args) => match store.get(&args.key)? {
            Some(value) => {
                output::value(&value);
                Ok(ExitCode::SUCCESS)
            }
            None => not_found(&args.key),
        },
        Commands::Delete(args) => {
            store.delete(&args.key)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Exists(args) => {
            let exists = store.exists(&args.key)?;
            println!("{exists}");
            Ok(if exists {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Keys(args) => {
            let prefix = args.prefix.as_deref().unwrap_or("");
            for key in store.keys() {
                let key = key?;
                if key.starts_with(prefix) {
                    println!("{key}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clear => {
            let removed = store.clear()?;
            output::note(&format!("Removed {removed} entries"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Pop(args) => match store.pop(&args.key)? {
            Some(value) => {
                output::value(&value);
                Ok(ExitCode::SUCCESS)
            }
            None => not_found(&args.key),
        },
        Commands::Len => {
            println!("{}", store.len()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => check::execute(store),
    }
}

fn not_found(key: &str) -> Result<ExitCode> {
    output::note(&format!("Key not found: {key}"));
    Ok(ExitCode::FAILURE)
}
