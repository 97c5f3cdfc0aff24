//! OutboxStore implementation for PgStorage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use outflow_core::{FailureCode, OutboxMessage};

use crate::error::StorageError;
use crate::traits::OutboxStore;

use super::{row_to_outbox, usize_to_i64, PgStorage};

const OUTBOX_COLUMNS: &str = "id, tenant_id, contact_id, conversation_id, channel, kind,
    template_id, payload, meta, scheduled_at, attempts, max_attempts, status, last_error,
    created_at, locked_until";

#[async_trait]
impl OutboxStore for PgStorage {
    async fn enqueue(&self, job: OutboxMessage) -> Result<Uuid, StorageError> {
        sqlx::query(
            "INSERT INTO outbox_messages
               (id, tenant_id, contact_id, conversation_id, channel, kind, template_id,
                payload, meta, scheduled_at, attempts, max_attempts, status, last_error,
                created_at, locked_until)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(job.id)
        .bind(job.tenant_id)
        .bind(job.contact_id)
        .bind(job.conversation_id)
        .bind(job.channel.as_str())
        .bind(job.kind.as_str())
        .bind(job.template_id)
        .bind(&job.payload)
        .bind(&job.meta)
        .bind(job.scheduled_at)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.status.as_str())
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.locked_until)
        .execute(self.pool())
        .await?;
        Ok(job.id)
    }

    async fn claim_due(
        &self,
        limit: usize,
        lease_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, StorageError> {
        let locked_until = now + Duration::seconds(lease_secs);
        let rows = sqlx::query(&format!(
            "UPDATE outbox_messages
               SET status = 'sending', locked_until = $1
               WHERE id IN (
                   SELECT id FROM outbox_messages
                   WHERE (status = 'queued'
                          AND (scheduled_at IS NULL OR scheduled_at <= $2)
                          AND (locked_until IS NULL OR locked_until < $2))
                      OR (status = 'sending' AND locked_until < $2)
                   ORDER BY created_at ASC
                   LIMIT $3
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING {OUTBOX_COLUMNS}"
        ))
        .bind(locked_until)
        .bind(now)
        .bind(usize_to_i64(limit))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_outbox).collect()
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StorageError> {
        self.update_outbox_row(
            id,
            "UPDATE outbox_messages
               SET status = 'sent', locked_until = NULL
               WHERE id = $1",
        )
        .await
    }

    async fn reschedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE outbox_messages
               SET status = 'queued', scheduled_at = $2, locked_until = NULL
               WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(self.pool())
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn release(&self, id: Uuid) -> Result<(), StorageError> {
        self.update_outbox_row(
            id,
            "UPDATE outbox_messages
               SET status = 'queued', locked_until = NULL
               WHERE id = $1",
        )
        .await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let result = match retry_at {
            Some(at) => {
                sqlx::query(
                    "UPDATE outbox_messages
                       SET attempts = attempts + 1, last_error = $2, status = 'queued',
                           scheduled_at = $3, locked_until = NULL
                       WHERE id = $1",
                )
                .bind(id)
                .bind(error)
                .bind(at)
                .execute(self.pool())
                .await?
            },
            None => {
                sqlx::query(
                    "UPDATE outbox_messages
                       SET attempts = attempts + 1, last_error = $2, status = 'failed',
                           locked_until = NULL
                       WHERE id = $1",
                )
                .bind(id)
                .bind(error)
                .execute(self.pool())
                .await?
            },
        };
        require_row(result.rows_affected(), id)
    }

    async fn fail_permanent(&self, id: Uuid, code: FailureCode) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE outbox_messages
               SET status = 'failed', last_error = $2, locked_until = NULL
               WHERE id = $1",
        )
        .bind(id)
        .bind(code.as_str())
        .execute(self.pool())
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn get_outbox_message(&self, id: Uuid) -> Result<Option<OutboxMessage>, StorageError> {
        let row =
            sqlx::query(&format!("SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.as_ref().map(row_to_outbox).transpose()
    }

    async fn outbox_depth(&self) -> Result<u64, StorageError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE status = 'queued'")
                .fetch_one(self.pool())
                .await?;
        Ok(count.max(0) as u64)
    }
}

impl PgStorage {
    async fn update_outbox_row(&self, id: Uuid, sql: &str) -> Result<(), StorageError> {
        let result = sqlx::query(sql).bind(id).execute(self.pool()).await?;
        require_row(result.rows_affected(), id)
    }
}

fn require_row(rows_affected: u64, id: Uuid) -> Result<(), StorageError> {
    if rows_affected == 0 {
        return Err(StorageError::NotFound { entity: "outbox_message", id: id.to_string() });
    }
    Ok(())
}
