//! Exponential backoff with jitter, shared by the S3 blob reader (3
//! attempts, 1s-10s), the bulk dispatcher (15 attempts, 2s-60s) and the
//! metadata migrator's idempotent create (3 attempts, 1s-10s). Grounded in
//! the `backoff`-crate retry loop used by the `sui-snapshot` reader around
//! its `object_store` gets.

use std::time::Duration;

use backoff::future::retry;
use backoff::ExponentialBackoff;

use crate::error::Error;

/// One named retry policy. `max_attempts` bounds the loop on top of
/// `backoff`'s own `max_elapsed_time`, so a caller gets a hard ceiling on
/// attempts even if each one returns instantly.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    /// §4.1: S3 gets retry 3 attempts, initial 1s, max 10s.
    pub const S3_BLOB: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(10),
        max_elapsed: Duration::from_secs(30),
    };

    /// §4.4: bulk retries, initial 2s, cap 60s, up to 15 attempts (~10 min).
    pub const BULK: RetryPolicy = RetryPolicy {
        max_attempts: 15,
        initial_interval: Duration::from_secs(2),
        max_interval: Duration::from_secs(60),
        max_elapsed: Duration::from_secs(600),
    };

    /// §4.5: metadata create retried 3x with 1-10s backoff.
    pub const METADATA_CREATE: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(10),
        max_elapsed: Duration::from_secs(30),
    };

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            randomization_factor: 0.5,
            ..ExponentialBackoff::default()
        }
    }
}

/// Runs `op` under `policy`, retrying on [`Error::is_retryable`] errors and
/// stopping immediately on anything else (e.g. 4xx that isn't 429) or once
/// `max_attempts` is exhausted.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let backoff = policy.backoff();
    retry(backoff, || {
        attempt += 1;
        let exhausted = attempt >= policy.max_attempts;
        let fut = op();
        async move {
            match fut.await {
                Ok(v) => Ok(v),
                Err(e) if e.is_retryable() && !exhausted => Err(backoff::Error::transient(e)),
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
    .map_err(|e| match e {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => Error::OperationFailed(err.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(RetryPolicy::S3_BLOB, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::TransientIo("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry(RetryPolicy::S3_BLOB, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::InvalidParameter("bad".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = with_retry(RetryPolicy::S3_BLOB, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::TransientIo("still broken".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
