//! Sliding-window send rate limiter over persisted snapshots.
//!
//! Two scopes per acquisition: the global ceiling (scope `Uuid::nil()`) and
//! the tenant's own ceiling, both over a rolling 60 second window. State
//! lives in `RateLimitStore` so limits survive restarts; a per-scope async
//! mutex serializes the read-modify-write so two concurrent callers cannot
//! both observe "under cap" and overshoot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use outflow_core::{global_rate_scope, RateLimitSnapshot, RATE_LIMIT_WINDOW_SECS};
use outflow_storage::{RateLimitStore, StorageError};

const SCOPE_NAME: &str = "send";

pub struct MessageSendRateLimiter {
    store: Arc<dyn RateLimitStore>,
    global_per_minute: usize,
    tenant_per_minute: usize,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl MessageSendRateLimiter {
    #[must_use]
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        global_per_minute: usize,
        tenant_per_minute: usize,
    ) -> Self {
        Self { store, global_per_minute, tenant_per_minute, locks: Mutex::new(HashMap::new()) }
    }

    /// Try to admit one send for `tenant_id` at `now`.
    ///
    /// Admission appends a hit to both the global and tenant windows and
    /// persists them; denial mutates nothing.
    ///
    /// # Errors
    /// Storage failures loading or saving snapshots.
    pub async fn try_acquire(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        // Lock order: global first, then tenant, same for every caller. The
        // nil tenant would alias the global lock and self-deadlock.
        let global_lock = self.scope_lock(global_rate_scope()).await;
        let _global_guard = global_lock.lock().await;
        let tenant_lock = self.scope_lock(tenant_id).await;
        let _tenant_guard = if tenant_id == global_rate_scope() {
            None
        } else {
            Some(tenant_lock.lock().await)
        };

        let window = Duration::seconds(RATE_LIMIT_WINDOW_SECS);
        let mut global = self.load(global_rate_scope(), now).await?;
        let mut tenant = self.load(tenant_id, now).await?;
        global.prune(window, now);
        tenant.prune(window, now);

        if global.hits.len() >= self.global_per_minute
            || tenant.hits.len() >= self.tenant_per_minute
        {
            tracing::debug!(
                tenant_id = %tenant_id,
                global_hits = global.hits.len(),
                tenant_hits = tenant.hits.len(),
                "send rate limited"
            );
            return Ok(false);
        }

        global.hits.push(now);
        tenant.hits.push(now);
        self.store.save_snapshot(&global).await?;
        self.store.save_snapshot(&tenant).await?;
        Ok(true)
    }

    async fn load(
        &self,
        scope: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RateLimitSnapshot, StorageError> {
        Ok(self
            .store
            .load_snapshot(scope, SCOPE_NAME)
            .await?
            .unwrap_or_else(|| RateLimitSnapshot::empty(scope, SCOPE_NAME, now)))
    }

    async fn scope_lock(&self, scope: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(scope).or_default())
    }
}

impl std::fmt::Debug for MessageSendRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSendRateLimiter")
            .field("global_per_minute", &self.global_per_minute)
            .field("tenant_per_minute", &self.tenant_per_minute)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outflow_storage::MemoryStorage;

    fn limiter(global: usize, tenant: usize) -> MessageSendRateLimiter {
        MessageSendRateLimiter::new(Arc::new(MemoryStorage::new()), global, tenant)
    }

    #[tokio::test]
    async fn test_third_call_within_minute_denied() {
        let limiter = limiter(100, 2);
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        assert!(limiter.try_acquire(tenant, now).await.unwrap());
        assert!(limiter.try_acquire(tenant, now + Duration::seconds(10)).await.unwrap());
        assert!(!limiter.try_acquire(tenant, now + Duration::seconds(20)).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_rolls_and_admits_again() {
        let limiter = limiter(100, 2);
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        assert!(limiter.try_acquire(tenant, now).await.unwrap());
        assert!(limiter.try_acquire(tenant, now).await.unwrap());
        assert!(!limiter.try_acquire(tenant, now + Duration::seconds(30)).await.unwrap());
        assert!(limiter.try_acquire(tenant, now + Duration::seconds(61)).await.unwrap());
    }

    #[tokio::test]
    async fn test_global_ceiling_spans_tenants() {
        let limiter = limiter(2, 100);
        let now = Utc::now();

        assert!(limiter.try_acquire(Uuid::new_v4(), now).await.unwrap());
        assert!(limiter.try_acquire(Uuid::new_v4(), now).await.unwrap());
        assert!(!limiter.try_acquire(Uuid::new_v4(), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_denial_does_not_consume_window_slots() {
        let limiter = limiter(100, 1);
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        assert!(limiter.try_acquire(tenant, now).await.unwrap());
        // Denied calls must not push the window forward.
        assert!(!limiter.try_acquire(tenant, now + Duration::seconds(30)).await.unwrap());
        assert!(!limiter.try_acquire(tenant, now + Duration::seconds(45)).await.unwrap());
        assert!(limiter.try_acquire(tenant, now + Duration::seconds(61)).await.unwrap());
    }
}
