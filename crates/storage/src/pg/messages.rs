//! MessageStore and MessageEventStore implementations for PgStorage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::{ChannelKind, Message, MessageEvent, MessageStatus};

use crate::error::StorageError;
use crate::traits::{MessageEventStore, MessageStore};
use crate::types::EventInsert;

use super::{row_to_message, statuses_before, PgStorage};

const MESSAGE_COLUMNS: &str = "id, tenant_id, conversation_id, channel, direction, kind,
    template_name, payload, status, provider, provider_message_id, delivered_at, opened_at,
    failed_at, error_code, error_reason, created_at";

#[async_trait]
impl MessageStore for PgStorage {
    async fn insert_message(&self, message: Message) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO messages
               (id, tenant_id, conversation_id, channel, direction, kind, template_name,
                payload, status, provider, provider_message_id, delivered_at, opened_at,
                failed_at, error_code, error_reason, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(message.id)
        .bind(message.tenant_id)
        .bind(message.conversation_id)
        .bind(message.channel.as_str())
        .bind(message.direction.as_str())
        .bind(message.kind.as_str())
        .bind(&message.template_name)
        .bind(&message.payload)
        .bind(message.status.as_str())
        .bind(&message.provider)
        .bind(&message.provider_message_id)
        .bind(message.delivered_at)
        .bind(message.opened_at)
        .bind(message.failed_at)
        .bind(&message.error_code)
        .bind(&message.error_reason)
        .bind(message.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StorageError> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn find_by_provider_id(
        &self,
        tenant_id: Uuid,
        provider: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
               WHERE tenant_id = $1 AND provider = $2 AND provider_message_id = $3"
        ))
        .bind(tenant_id)
        .bind(provider)
        .bind(provider_message_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn apply_status(
        &self,
        id: Uuid,
        status: MessageStatus,
        at: DateTime<Utc>,
        error_code: Option<&str>,
        error_reason: Option<&str>,
    ) -> Result<bool, StorageError> {
        // The `status = ANY($4)` guard makes the transition monotonic: a row
        // already at or past the target status is left untouched and the
        // update reports zero affected rows.
        let sql = match status {
            MessageStatus::Delivered => {
                "UPDATE messages
                   SET status = $1, delivered_at = $2,
                       error_code = COALESCE($5, error_code),
                       error_reason = COALESCE($6, error_reason)
                   WHERE id = $3 AND status = ANY($4)"
            },
            MessageStatus::Opened => {
                "UPDATE messages
                   SET status = $1, opened_at = $2,
                       delivered_at = COALESCE(delivered_at, $2),
                       error_code = COALESCE($5, error_code),
                       error_reason = COALESCE($6, error_reason)
                   WHERE id = $3 AND status = ANY($4)"
            },
            MessageStatus::Failed | MessageStatus::Bounced => {
                "UPDATE messages
                   SET status = $1, failed_at = $2,
                       error_code = COALESCE($5, error_code),
                       error_reason = COALESCE($6, error_reason)
                   WHERE id = $3 AND status = ANY($4)"
            },
            MessageStatus::Queued | MessageStatus::Sent => {
                "UPDATE messages
                   SET status = $1,
                       error_code = COALESCE($5, error_code),
                       error_reason = COALESCE($6, error_reason)
                   WHERE id = $3 AND status = ANY($4)"
            },
        };
        let result = sqlx::query(sql)
            .bind(status.as_str())
            .bind(at)
            .bind(id)
            .bind(statuses_before(status))
            .bind(error_code)
            .bind(error_reason)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_outbound_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages
               WHERE tenant_id = $1 AND direction = 'out' AND created_at >= $2
                 AND status NOT IN ('failed', 'bounced')",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(self.pool())
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn last_inbound_at(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(m.created_at) FROM messages m
               JOIN conversations c ON c.id = m.conversation_id
               WHERE m.tenant_id = $1 AND c.contact_id = $2
                 AND m.channel = $3 AND m.direction = 'in'",
        )
        .bind(tenant_id)
        .bind(contact_id)
        .bind(channel.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok(last)
    }
}

#[async_trait]
impl MessageEventStore for PgStorage {
    async fn record_event(&self, event: MessageEvent) -> Result<EventInsert, StorageError> {
        let result = sqlx::query(
            "INSERT INTO message_events
               (id, tenant_id, message_id, provider, provider_event_id, event_type, payload,
                created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (provider, provider_event_id) DO NOTHING",
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(event.message_id)
        .bind(&event.provider)
        .bind(&event.provider_event_id)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            Ok(EventInsert::Duplicate)
        } else {
            Ok(EventInsert::Inserted)
        }
    }

    async fn event_exists(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM message_events
                 WHERE provider = $1 AND provider_event_id = $2
             )",
        )
        .bind(provider)
        .bind(provider_event_id)
        .fetch_one(self.pool())
        .await?;
        Ok(exists)
    }
}
