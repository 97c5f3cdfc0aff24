use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::{ChannelKind, Contact, Conversation};

use crate::error::StorageError;

/// Contact lookups used by the dispatch guard and inbound webhook routing.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, StorageError>;

    /// Lookup by E.164-normalized phone number within a tenant.
    async fn find_contact_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StorageError>;

    /// Lookup by lowercased email within a tenant.
    async fn find_contact_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, StorageError>;

    /// Insert or replace a contact row. Contact CRUD lives outside the
    /// engine; this exists for seeding and for import collaborators.
    async fn upsert_contact(&self, contact: Contact) -> Result<(), StorageError>;
}

/// Conversation grouping operations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StorageError>;

    /// Most recent conversation for a contact on a channel, if any.
    async fn find_latest_conversation(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<Conversation>, StorageError>;

    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StorageError>;

    /// Bump `last_message_at` after a message lands in the conversation.
    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError>;
}
