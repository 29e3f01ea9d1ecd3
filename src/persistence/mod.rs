//! PostgreSQL backends for the ledger, audit log and credit store.
//!
//! Enable with the `postgres` feature flag. Run [`migrate`] once per database
//! before use; it creates tables, unique indexes and the triggers that reject
//! UPDATE and DELETE on sealed rows.

mod audit;
mod credit;
mod ledger;
mod schema;

use std::time::Duration;

use crate::{Error, Result};

pub use audit::PostgresAuditLog;
pub use credit::PostgresCreditStore;
pub use ledger::PostgresLedgerStore;
pub use schema::migrate;

/// SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";
/// Message prefix raised by the immutability triggers.
const IMMUTABLE_PREFIX: &str = "ledger_immutable";

/// Retry behaviour for transient storage failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub(crate) async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        with_retry(
            self.max_retries,
            self.initial_backoff,
            self.max_backoff,
            Error::is_retryable,
            operation,
        )
        .await
    }
}

pub(crate) trait StorageResultExt<T> {
    fn storage_err(self) -> Result<T>;
    fn storage_err_ctx(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage_err(self) -> Result<T> {
        self.map_err(|e| Error::storage(e.to_string()))
    }

    fn storage_err_ctx(self, context: &str) -> Result<T> {
        self.map_err(|e| Error::storage(format!("{}: {}", context, e)))
    }
}

pub(crate) async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    is_retryable: impl Fn(&Error) -> bool,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut backoff = initial_backoff;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries && is_retryable(&e) => {
                attempt += 1;
                tracing::warn!(
                    attempt = attempt,
                    error = %e,
                    "Retrying storage operation after transient failure"
                );
                let jitter_factor = 1.0 + (rand::random::<f64>() * 0.2 - 0.1);
                tokio::time::sleep(backoff.mul_f64(jitter_factor)).await;
                backoff = (backoff * 2).min(max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Database failure classified by what the caller must do about it.
pub(crate) enum DbFailure {
    UniqueViolation,
    Immutable,
    Other(Error),
}

pub(crate) fn classify(err: sqlx::Error) -> DbFailure {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return DbFailure::UniqueViolation;
        }
        if db.message().starts_with(IMMUTABLE_PREFIX) {
            return DbFailure::Immutable;
        }
    }
    DbFailure::Other(Error::storage(err.to_string()))
}

/// Maps a database failure where a unique violation is not expected.
pub(crate) fn db_error(err: sqlx::Error, record: &'static str, id: impl ToString) -> Error {
    match classify(err) {
        DbFailure::Immutable => Error::immutable(record, id),
        DbFailure::UniqueViolation => {
            Error::storage(format!("unexpected unique violation on {record} {}", id.to_string()))
        }
        DbFailure::Other(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retry_retries_storage_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
            Error::is_retryable,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::storage("connection reset"))
                } else {
                    Ok(7)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_rejections() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::default()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidAmount {
                    amount: rust_decimal::Decimal::ZERO,
                })
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_storage_err_ctx() {
        let err = std::result::Result::<(), _>::Err("timeout")
            .storage_err_ctx("load wallet")
            .unwrap_err();
        assert_eq!(err.to_string(), "Storage error: load wallet: timeout");
    }
}
