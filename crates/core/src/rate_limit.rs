//! Persisted rolling-window state for the send rate limiter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope identifier for the engine-wide ceiling. Per-tenant scopes use the
/// tenant's own id.
#[must_use]
pub fn global_rate_scope() -> Uuid {
    Uuid::nil()
}

/// Rolling-window hit timestamps for one `(tenant, scope)` pair.
///
/// Persisted so rate limits survive process restarts; one row per pair,
/// upserted by the limiter on every admitted send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    /// Tenant the window belongs to; `Uuid::nil()` for the global scope.
    pub target_tenant_id: Uuid,
    /// Logical scope name, currently always `"send"`.
    pub scope: String,
    pub hits: Vec<DateTime<Utc>>,
    pub window_started_at: DateTime<Utc>,
}

impl RateLimitSnapshot {
    #[must_use]
    pub fn empty(target_tenant_id: Uuid, scope: &str, now: DateTime<Utc>) -> Self {
        Self {
            target_tenant_id,
            scope: scope.to_owned(),
            hits: Vec::new(),
            window_started_at: now,
        }
    }

    /// Drop hits older than the window ending at `now`.
    pub fn prune(&mut self, window: chrono::Duration, now: DateTime<Utc>) {
        let cutoff = now - window;
        self.hits.retain(|hit| *hit > cutoff);
    }
}
