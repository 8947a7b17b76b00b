//! Shared-store connection handling.
//!
//! One [`RedisConnector`] is shared by the cache backend and the version
//! tracker. The first caller establishes the connection; concurrent callers
//! await the same in-flight attempt. A failed attempt is not cached, so the
//! next request retries instead of waiting on a dead flag.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use quarry_core::{QuarryConfig, QuarryResult, StoreError};
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Run a store call under a deadline, mapping both failure kinds to
/// [`StoreError`].
pub async fn bounded<T, E, F>(operation: &str, after: Duration, fut: F) -> QuarryResult<T>
where
    E: Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StoreError::Unavailable {
            reason: format!("{} failed: {}", operation, e),
        }
        .into()),
        Err(_) => Err(StoreError::Timeout {
            operation: operation.to_string(),
            after,
        }
        .into()),
    }
}

/// Lazily connected handle to the shared store.
pub struct RedisConnector {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl std::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("connected", &self.manager.initialized())
            .field("connect_timeout", &self.connect_timeout)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl RedisConnector {
    /// Validate the URL. No network I/O happens until the first call.
    pub fn new(url: &str, config: &QuarryConfig) -> QuarryResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable {
            reason: format!("invalid cache store url: {}", e),
        })?;

        Ok(Self {
            client,
            manager: OnceCell::new(),
            connect_timeout: config.connect_timeout,
            call_timeout: config.store_timeout,
        })
    }

    /// Deadline applied to individual store commands.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.manager.initialized()
    }

    /// Get a connection handle, connecting on first use.
    ///
    /// `ConnectionManager` is a cheap clone over a multiplexed connection
    /// that reconnects on its own once established.
    pub async fn connection(&self) -> QuarryResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                debug!("Connecting to cache store");
                let manager = bounded(
                    "connect",
                    self.connect_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await
                .inspect_err(|e| warn!(error = %e, "Cache store connection failed"))?;
                info!("Cache store connected");
                Ok::<_, quarry_core::QuarryError>(manager)
            })
            .await?;

        Ok(manager.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::QuarryError;

    #[tokio::test]
    async fn test_bounded_passes_value_through() {
        let result: QuarryResult<u32> =
            bounded("get", Duration::from_secs(1), async { Ok::<_, String>(7) }).await;
        assert_eq!(result.expect("call should succeed"), 7);
    }

    #[tokio::test]
    async fn test_bounded_maps_error() {
        let result: QuarryResult<u32> = bounded("get", Duration::from_secs(1), async {
            Err::<u32, _>("connection refused")
        })
        .await;
        match result {
            Err(QuarryError::Store(StoreError::Unavailable { reason })) => {
                assert!(reason.contains("get failed"));
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: QuarryResult<()> = bounded("set", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        })
        .await;
        assert!(matches!(
            result,
            Err(QuarryError::Store(StoreError::Timeout { .. }))
        ));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = RedisConnector::new("not a url", &QuarryConfig::default())
            .expect_err("garbage url should be rejected");
        assert!(err.is_cache_layer());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_not_cached_as_connected() {
        let config = QuarryConfig::default().with_connect_timeout(Duration::from_millis(200));
        let connector = RedisConnector::new("redis://127.0.0.1:1/", &config)
            .expect("url should parse");

        assert!(connector.connection().await.is_err());
        assert!(!connector.is_connected());
        assert!(connector.connection().await.is_err());
    }
}
