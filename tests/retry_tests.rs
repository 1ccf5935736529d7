//! Retry, cancellation and deadline behaviour observed through the store.

mod support;

use std::thread;
use std::time::{Duration, Instant};

use sqlkv::config::{DatabaseConfig, RetryConfig, StoreConfig};
use sqlkv::{ConfigError, Error, Store, UpsertMode};
use support::temp_db::fast_retry;

fn store_with(retry: RetryConfig, operation_timeout_ms: Option<u64>) -> Store {
    let config = StoreConfig {
        database: DatabaseConfig {
            operation_timeout_ms,
            ..DatabaseConfig::sqlite_memory()
        },
        retry,
    };
    Store::open("retry", &config).expect("open store")
}

fn fallback_store(retry: RetryConfig) -> Store {
    let config = StoreConfig {
        database: DatabaseConfig {
            upsert: UpsertMode::Fallback,
            ..DatabaseConfig::sqlite_memory()
        },
        retry,
    };
    Store::open("retry", &config).expect("open fallback store")
}

#[test]
fn put_succeeds_after_fewer_failures_than_attempts() {
    let store = store_with(fast_retry(5), None);
    store.inject_transient_failures(4);
    store.put("k", b"final").unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"final".to_vec()));
}

#[test]
fn fallback_overwrite_with_single_attempt() {
    let store = fallback_store(fast_retry(1));
    store.put("k", b"1").unwrap();
    store.put("k", b"2").unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn fallback_overwrite_succeeds_after_fewer_failures_than_attempts() {
    let store = fallback_store(fast_retry(3));
    store.put("k", b"1").unwrap();
    store.inject_transient_failures(2);
    store.put("k", b"2").unwrap();
    assert_eq!(store.get("k").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn fallback_overwrite_exhausts_when_every_attempt_fails() {
    let store = fallback_store(fast_retry(2));
    store.put("k", b"1").unwrap();
    store.inject_transient_failures(2);
    assert!(matches!(
        store.put("k", b"2"),
        Err(Error::RetryExhausted { attempts: 2, .. })
    ));
    assert_eq!(store.get("k").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn put_exhausts_when_every_attempt_fails() {
    let store = store_with(fast_retry(3), None);
    store.put("k", b"before").unwrap();

    store.inject_transient_failures(3);
    match store.put("k", b"after") {
        Err(Error::RetryExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert!(last.is_transient());
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(store.get("k").unwrap(), Some(b"before".to_vec()));
}

#[test]
fn reads_are_retried_too() {
    let store = store_with(fast_retry(3), None);
    store.put("k", b"v").unwrap();
    store.inject_transient_failures(2);
    assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    store.inject_transient_failures(2);
    assert!(store.exists("k").unwrap());
}

#[test]
fn cancelled_token_aborts_operations() {
    let store = store_with(fast_retry(3), None);
    store.cancel_token().cancel();
    assert!(matches!(store.put("k", b"v"), Err(Error::Cancelled)));
    assert!(matches!(store.get("k"), Err(Error::Cancelled)));
}

#[test]
fn cancel_during_backoff_returns_promptly() {
    let slow = RetryConfig {
        max_retries: 5,
        initial_backoff_ms: 30_000,
        backoff_multiplier: 1.0,
        max_backoff_ms: 30_000,
    };
    let store = store_with(slow, None);
    store.inject_transient_failures(5);

    let token = store.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        token.cancel();
    });

    let start = Instant::now();
    let result = store.put("k", b"v");
    canceller.join().unwrap();

    assert!(matches!(result, Err(Error::Cancelled)), "{result:?}");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn operation_deadline_cuts_backoff_short() {
    let slow = RetryConfig {
        max_retries: 10,
        initial_backoff_ms: 30_000,
        backoff_multiplier: 1.0,
        max_backoff_ms: 30_000,
    };
    let store = store_with(slow, Some(100));
    store.inject_transient_failures(10);

    let start = Instant::now();
    assert!(matches!(store.put("k", b"v"), Err(Error::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(10));

    // The deadline is per operation; the store stays usable.
    store.inject_transient_failures(0);
    store.put("k", b"v").unwrap();
}

#[test]
fn unreachable_database_fails_open_as_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no/such/dir/kv.db");
    let config = StoreConfig {
        database: DatabaseConfig {
            connection_timeout_ms: 100,
            ..DatabaseConfig::sqlite_file(missing.display().to_string())
        },
        retry: fast_retry(2),
    };

    match Store::open("kv", &config) {
        Err(Error::Config(ConfigError::Unreachable(inner))) => {
            assert!(matches!(*inner, Error::RetryExhausted { attempts: 2, .. }));
        }
        other => panic!("expected Unreachable, got {other:?}"),
    }
}
