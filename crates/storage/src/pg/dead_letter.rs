//! DeadLetterStore implementation for PgStorage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::WebhookDeadLetterItem;

use crate::error::StorageError;
use crate::traits::DeadLetterStore;

use super::{row_to_dead_letter, usize_to_i64, PgStorage};

const DEAD_LETTER_COLUMNS: &str = "id, tenant_id, channel, provider, kind, payload, headers,
    last_error, retry_count, next_attempt_at, status, created_at";

#[async_trait]
impl DeadLetterStore for PgStorage {
    async fn push_dead_letter(&self, item: WebhookDeadLetterItem) -> Result<Uuid, StorageError> {
        sqlx::query(
            "INSERT INTO webhook_dead_letters
               (id, tenant_id, channel, provider, kind, payload, headers, last_error,
                retry_count, next_attempt_at, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(item.id)
        .bind(item.tenant_id)
        .bind(item.channel.as_str())
        .bind(&item.provider)
        .bind(item.kind.as_str())
        .bind(&item.payload)
        .bind(serde_json::to_value(&item.headers)?)
        .bind(&item.last_error)
        .bind(item.retry_count)
        .bind(item.next_attempt_at)
        .bind(item.status.as_str())
        .bind(item.created_at)
        .execute(self.pool())
        .await?;
        Ok(item.id)
    }

    async fn due_dead_letters(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDeadLetterItem>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM webhook_dead_letters
               WHERE status = 'pending' AND next_attempt_at <= $1
               ORDER BY next_attempt_at ASC
               LIMIT $2"
        ))
        .bind(now)
        .bind(usize_to_i64(limit))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_dead_letter).collect()
    }

    async fn mark_dead_letter_success(&self, id: Uuid) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE webhook_dead_letters
               SET status = 'resolved', next_attempt_at = NULL
               WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn mark_dead_letter_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE webhook_dead_letters
               SET retry_count = retry_count + 1, last_error = $2, next_attempt_at = $3
               WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(self.pool())
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn mark_dead_letter_exhausted(&self, id: Uuid, error: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE webhook_dead_letters
               SET retry_count = retry_count + 1, last_error = $2, status = 'exhausted',
                   next_attempt_at = NULL
               WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(self.pool())
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn get_dead_letter(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookDeadLetterItem>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {DEAD_LETTER_COLUMNS} FROM webhook_dead_letters WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_dead_letter).transpose()
    }

    async fn dead_letter_depth(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_dead_letters WHERE status = 'pending'",
        )
        .fetch_one(self.pool())
        .await?;
        Ok(count.max(0) as u64)
    }
}

fn require_row(rows_affected: u64, id: Uuid) -> Result<(), StorageError> {
    if rows_affected == 0 {
        return Err(StorageError::NotFound { entity: "webhook_dead_letter", id: id.to_string() });
    }
    Ok(())
}
