//! Fixed-window request rate limiting
//!
//! Key = (operation identifier, principal). The principal is the account
//! id in by-account mode, falling back to the caller's network address.
//! Algorithm: increment the counter; if this increment created the key,
//! set a TTL equal to the window; reject once the count exceeds the
//! ceiling. The window resets naturally when the key expires.
//!
//! Fails open: if the counter store is unreachable the request is allowed
//! through and the fault is logged. Infrastructure failure never blocks
//! legitimate traffic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ApiError;
use crate::model::Caller;

/// External counter store contract (`get` / `incr` / `expire`).
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<u64>>;

    /// Increment and return the new count. A missing or expired key counts
    /// from zero.
    async fn incr(&self, key: &str) -> anyhow::Result<u64>;

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;
}

/// Per-call-site limit parameters.
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub ceiling: u64,
    pub window: Duration,
    /// Key by account when the caller has one; otherwise the network
    /// address is the principal.
    pub by_account: bool,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            ceiling: 1000,
            window: Duration::from_secs(24 * 60 * 60),
            by_account: true,
        }
    }
}

impl RateLimit {
    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn by_address(mut self) -> Self {
        self.by_account = false;
        self
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    fn principal(caller: &Caller, limit: &RateLimit) -> String {
        if limit.by_account {
            if let Some(id) = caller.id {
                return id.to_string();
            }
        }
        caller
            .address
            .clone()
            .unwrap_or_else(|| "anonymous".to_string())
    }

    /// Check one request against the limit for `operation`.
    pub async fn check(
        &self,
        operation: &str,
        caller: &Caller,
        limit: &RateLimit,
    ) -> Result<(), ApiError> {
        let principal = Self::principal(caller, limit);
        let key = format!("rate:{operation}:{principal}");

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(
                    operation = operation,
                    error = %error,
                    "counter store unreachable; admitting request"
                );
                return Ok(());
            }
        };

        if count == 1 {
            if let Err(error) = self.store.expire(&key, limit.window).await {
                tracing::warn!(
                    operation = operation,
                    error = %error,
                    "failed to set rate-limit window"
                );
            }
        }

        if count > limit.ceiling {
            return Err(ApiError::RateLimitExceeded {
                operation: operation.to_string(),
                ceiling: limit.ceiling,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory counter store for the dev server and tests.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<u64>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.count)),
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> anyhow::Result<u64> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: None,
        });
        if entry.expired() {
            entry.count = 0;
            entry.expires_at = None;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    /// A counter store that always errors, for the fail-open contract.
    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<u64>> {
            anyhow::bail!("store down")
        }
        async fn incr(&self, _key: &str) -> anyhow::Result<u64> {
            anyhow::bail!("store down")
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("store down")
        }
    }

    #[tokio::test]
    async fn test_ceiling_rejects_next_call() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        let caller = Caller::for_user(Uuid::new_v4());
        let limit = RateLimit::default().with_ceiling(3);

        for _ in 0..3 {
            limiter.check("projectCreate", &caller, &limit).await.unwrap();
        }
        assert_matches!(
            limiter.check("projectCreate", &caller, &limit).await,
            Err(ApiError::RateLimitExceeded { ceiling: 3, .. })
        );
        // A different operation has its own window.
        limiter.check("routineCreate", &caller, &limit).await.unwrap();
    }

    #[tokio::test]
    async fn test_window_expiry_resets_counter() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(store.clone());
        let caller = Caller::for_user(Uuid::new_v4());
        let limit = RateLimit::default()
            .with_ceiling(1)
            .with_window(Duration::from_millis(20));

        limiter.check("feed", &caller, &limit).await.unwrap();
        assert_matches!(
            limiter.check("feed", &caller, &limit).await,
            Err(ApiError::RateLimitExceeded { .. })
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        limiter.check("feed", &caller, &limit).await.unwrap();

        // The counter restarted at 1 for the fresh window.
        let key = format!("rate:feed:{}", caller.id.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_address_keyed_principal() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()));
        let limit = RateLimit::default().with_ceiling(1).by_address();

        let mut first = Caller::anonymous();
        first.address = Some("10.0.0.1".to_string());
        let mut second = Caller::anonymous();
        second.address = Some("10.0.0.2".to_string());

        limiter.check("feed", &first, &limit).await.unwrap();
        assert_matches!(
            limiter.check("feed", &first, &limit).await,
            Err(ApiError::RateLimitExceeded { .. })
        );
        // A different address is a different principal.
        limiter.check("feed", &second, &limit).await.unwrap();
    }

    #[tokio::test]
    async fn test_fails_open_when_store_is_down() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        let caller = Caller::for_user(Uuid::new_v4());
        let limit = RateLimit::default().with_ceiling(1);

        for _ in 0..5 {
            assert!(limiter.check("feed", &caller, &limit).await.is_ok());
        }
    }
}
