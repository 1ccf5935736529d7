use std::path::{Path, PathBuf};

use sqlkv::config::{DatabaseConfig, RetryConfig, StoreConfig};
use sqlkv::{Store, UpsertMode};
use tempfile::TempDir;

/// Retry settings that keep failing tests fast.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_backoff_ms: 1,
        backoff_multiplier: 2.0,
        max_backoff_ms: 10,
    }
}

/// In-memory SQLite store; lives as long as the returned handle.
pub fn memory_store(name: &str) -> Store {
    let config = StoreConfig {
        database: DatabaseConfig::sqlite_memory(),
        retry: fast_retry(5),
    };
    Store::open(name, &config).expect("open in-memory store")
}

/// Temporary SQLite database file for integration tests.
pub struct TempDb {
    dir: TempDir,
    path: PathBuf,
}

impl TempDb {
    pub fn create() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("sqlkv.db");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self, upsert: UpsertMode) -> StoreConfig {
        self.config_with(upsert, fast_retry(10))
    }

    pub fn config_with(&self, upsert: UpsertMode, retry: RetryConfig) -> StoreConfig {
        StoreConfig {
            database: DatabaseConfig {
                upsert,
                ..DatabaseConfig::sqlite_file(self.path.display().to_string())
            },
            retry,
        }
    }

    pub fn open(&self, name: &str) -> Store {
        self.open_with(name, UpsertMode::Auto)
    }

    pub fn open_with(&self, name: &str, upsert: UpsertMode) -> Store {
        Store::open(name, &self.config(upsert)).expect("open file store")
    }
}
