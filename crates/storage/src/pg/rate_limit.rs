//! RateLimitStore implementation for PgStorage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use outflow_core::RateLimitSnapshot;

use crate::error::StorageError;
use crate::traits::RateLimitStore;

use super::PgStorage;

#[async_trait]
impl RateLimitStore for PgStorage {
    async fn load_snapshot(
        &self,
        target_tenant_id: Uuid,
        scope: &str,
    ) -> Result<Option<RateLimitSnapshot>, StorageError> {
        let row = sqlx::query(
            "SELECT hits, window_started_at FROM rate_limit_snapshots
               WHERE target_tenant_id = $1 AND scope = $2",
        )
        .bind(target_tenant_id)
        .bind(scope)
        .fetch_optional(self.pool())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let hits: serde_json::Value = row.try_get("hits")?;
        let hits: Vec<DateTime<Utc>> = serde_json::from_value(hits)?;
        Ok(Some(RateLimitSnapshot {
            target_tenant_id,
            scope: scope.to_owned(),
            hits,
            window_started_at: row.try_get("window_started_at")?,
        }))
    }

    async fn save_snapshot(&self, snapshot: &RateLimitSnapshot) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO rate_limit_snapshots (target_tenant_id, scope, hits, window_started_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (target_tenant_id, scope) DO UPDATE SET
                 hits = EXCLUDED.hits,
                 window_started_at = EXCLUDED.window_started_at",
        )
        .bind(snapshot.target_tenant_id)
        .bind(&snapshot.scope)
        .bind(serde_json::to_value(&snapshot.hits)?)
        .bind(snapshot.window_started_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
