//! ContactStore and ConversationStore implementations for PgStorage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::{ChannelKind, Contact, Conversation};

use crate::error::StorageError;
use crate::traits::{ContactStore, ConversationStore};

use super::{row_to_contact, row_to_conversation, PgStorage};

const CONTACT_COLUMNS: &str =
    "id, tenant_id, full_name, email, phone, timezone, tags, opted_out";

const CONVERSATION_COLUMNS: &str =
    "id, tenant_id, contact_id, channel, created_at, last_message_at";

#[async_trait]
impl ContactStore for PgStorage {
    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, StorageError> {
        let row = sqlx::query(&format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_contact).transpose()
    }

    async fn find_contact_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = $1 AND phone = $2"
        ))
        .bind(tenant_id)
        .bind(phone)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_contact).transpose()
    }

    async fn find_contact_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
               WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)"
        ))
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_contact).transpose()
    }

    async fn upsert_contact(&self, contact: Contact) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO contacts (id, tenant_id, full_name, email, phone, timezone, tags,
                                   opted_out)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (id) DO UPDATE SET
                 full_name = EXCLUDED.full_name,
                 email = EXCLUDED.email,
                 phone = EXCLUDED.phone,
                 timezone = EXCLUDED.timezone,
                 tags = EXCLUDED.tags,
                 opted_out = EXCLUDED.opted_out",
        )
        .bind(contact.id)
        .bind(contact.tenant_id)
        .bind(&contact.full_name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(&contact.timezone)
        .bind(serde_json::to_value(&contact.tags)?)
        .bind(contact.opted_out)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for PgStorage {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn find_latest_conversation(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
               WHERE tenant_id = $1 AND contact_id = $2 AND channel = $3
               ORDER BY created_at DESC
               LIMIT 1"
        ))
        .bind(tenant_id)
        .bind(contact_id)
        .bind(channel.as_str())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO conversations (id, tenant_id, contact_id, channel, created_at,
                                        last_message_at)
               VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(conversation.id)
        .bind(conversation.tenant_id)
        .bind(conversation.contact_id)
        .bind(conversation.channel.as_str())
        .bind(conversation.created_at)
        .bind(conversation.last_message_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let result =
            sqlx::query("UPDATE conversations SET last_message_at = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(self.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound { entity: "conversation", id: id.to_string() });
        }
        Ok(())
    }
}
