//! Connection acquisition with bounded retry and privilege routing.
//!
//! Two sources implement [`ConnectionSource`]:
//! - [`BootstrapSource`]: one dedicated client per privilege tier, used while
//!   the schema is created and data is migrated. Borrows of a tier are
//!   serialized.
//! - [`PooledSource`]: two deadpool-postgres pools, one per tier, used in
//!   steady state.
//!
//! Callers never talk to a source directly. [`Acquirer::borrow`] wraps it in
//! a fixed retry loop and turns repeated failures into
//! [`RecordStoreError::PoolExhausted`], which must not be retried.

mod bootstrap;
mod pooled;
pub mod tls;

pub use bootstrap::BootstrapSource;
pub use pooled::PooledSource;

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tokio_postgres::Client;
use tracing::{debug, error, warn};

use crate::error::{RecordStoreError, Result};

/// Acquisition attempts before giving up.
pub const MAX_ATTEMPTS: u32 = 5;

/// Fixed pause between two attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// A borrowed connection. Dropping it is the release: pooled objects go back
/// to their pool, dedicated clients are unlocked for the next borrower.
///
/// Transactions are opened with [`Client::transaction`] through
/// [`DerefMut`]. A transaction dropped before commit, including one whose
/// future was cancelled, queues its `ROLLBACK` ahead of any later statement
/// on the same connection.
pub enum DbConn {
    Pooled(deadpool_postgres::Object),
    Dedicated(OwnedMutexGuard<Client>),
}

impl Deref for DbConn {
    type Target = Client;

    fn deref(&self) -> &Client {
        match self {
            DbConn::Pooled(obj) => &***obj,
            DbConn::Dedicated(client) => &**client,
        }
    }
}

impl DerefMut for DbConn {
    fn deref_mut(&mut self) -> &mut Client {
        match self {
            DbConn::Pooled(obj) => &mut ***obj,
            DbConn::Dedicated(client) => &mut **client,
        }
    }
}

impl std::fmt::Debug for DbConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbConn::Pooled(_) => f.write_str("DbConn::Pooled"),
            DbConn::Dedicated(_) => f.write_str("DbConn::Dedicated"),
        }
    }
}

/// Something that can hand out a connection for a privilege tier.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// One acquisition attempt. Retries belong to [`Acquirer`].
    async fn acquire(&self, privileged: bool) -> Result<DbConn>;

    /// Short label for logs ("bootstrap" or "pooled").
    fn mode(&self) -> &'static str;

    /// Stop handing out connections.
    fn close(&self) {}
}

/// Retry front-end shared by every store bound to one database.
#[derive(Clone)]
pub struct Acquirer {
    source: Arc<dyn ConnectionSource>,
    max_attempts: u32,
    backoff: Duration,
}

impl Acquirer {
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            source,
            max_attempts: MAX_ATTEMPTS,
            backoff: RETRY_BACKOFF,
        }
    }

    /// Borrow a connection from the admin tier (`privileged`) or the user tier.
    pub async fn borrow(&self, privileged: bool) -> Result<DbConn> {
        retry_acquire(self.max_attempts, self.backoff, privileged, || {
            self.source.acquire(privileged)
        })
        .await
    }

    pub fn mode(&self) -> &'static str {
        self.source.mode()
    }

    pub fn close(&self) {
        self.source.close();
    }
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquirer")
            .field("mode", &self.source.mode())
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Run `attempt` up to `max_attempts` times, sleeping `backoff` between
/// failures but not after the last one.
pub(crate) async fn retry_acquire<T, F, Fut>(
    max_attempts: u32,
    backoff: Duration,
    privileged: bool,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Ok(conn) => {
                if tries > 1 {
                    debug!("Acquired connection after {} attempts", tries);
                }
                return Ok(conn);
            }
            Err(e) if tries >= max_attempts => {
                error!(
                    "Giving up on connection (privileged: {}) after {} attempts: {}",
                    privileged, tries, e
                );
                return Err(RecordStoreError::PoolExhausted {
                    privileged,
                    attempts: tries,
                });
            }
            Err(e) => {
                warn!(
                    "Connection attempt {}/{} failed (privileged: {}): {}",
                    tries, max_attempts, privileged, e
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct RefusingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ConnectionSource for RefusingSource {
        async fn acquire(&self, _privileged: bool) -> Result<DbConn> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RecordStoreError::pool("connection refused", "test source"))
        }

        fn mode(&self) -> &'static str {
            "refusing"
        }
    }

    #[tokio::test]
    async fn test_borrow_gives_up_after_five_attempts() {
        let source = Arc::new(RefusingSource {
            calls: AtomicU32::new(0),
        });
        let acquirer = Acquirer::new(source.clone());

        let started = Instant::now();
        let err = acquirer.borrow(true).await.unwrap_err();

        assert_eq!(source.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(started.elapsed() >= RETRY_BACKOFF * (MAX_ATTEMPTS - 1));
        assert!(err.is_fatal());
        match err {
            RecordStoreError::PoolExhausted {
                privileged,
                attempts,
            } => {
                assert!(privileged);
                assert_eq!(attempts, MAX_ATTEMPTS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_before_limit() {
        let calls = AtomicU32::new(0);
        let result = retry_acquire(MAX_ATTEMPTS, RETRY_BACKOFF, false, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(RecordStoreError::pool("busy", "test"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_first_success_does_not_sleep() {
        let started = Instant::now();
        let value = retry_acquire(MAX_ATTEMPTS, Duration::from_secs(5), false, || async {
            Ok::<_, RecordStoreError>("conn")
        })
        .await
        .unwrap();
        assert_eq!(value, "conn");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_single_attempt_exhausts_immediately() {
        let err = retry_acquire(1, Duration::from_secs(5), false, || async {
            Err::<(), _>(RecordStoreError::pool("down", "test"))
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RecordStoreError::PoolExhausted {
                privileged: false,
                attempts: 1
            }
        ));
    }
}
