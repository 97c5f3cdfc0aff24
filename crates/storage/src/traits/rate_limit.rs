use async_trait::async_trait;
use uuid::Uuid;

use outflow_core::RateLimitSnapshot;

use crate::error::StorageError;

/// Persistence for rolling-window rate-limit state.
///
/// One snapshot per `(tenant, scope)` pair, upserted. Serializing the
/// read-modify-write cycle is the limiter's job, not the store's.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn load_snapshot(
        &self,
        target_tenant_id: Uuid,
        scope: &str,
    ) -> Result<Option<RateLimitSnapshot>, StorageError>;

    async fn save_snapshot(&self, snapshot: &RateLimitSnapshot) -> Result<(), StorageError>;
}
