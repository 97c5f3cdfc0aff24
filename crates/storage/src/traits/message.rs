use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::{ChannelKind, Message, MessageEvent, MessageStatus};

use crate::error::StorageError;
use crate::types::EventInsert;

/// Canonical message operations.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: Message) -> Result<(), StorageError>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StorageError>;

    /// Locate a message by its provider-assigned id within a tenant.
    async fn find_by_provider_id(
        &self,
        tenant_id: Uuid,
        provider: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StorageError>;

    /// Apply a provider status monotonically.
    ///
    /// Returns `true` when the transition was applied, `false` when it was
    /// refused because the message is already at or past `status` (late or
    /// out-of-order callback — a no-op, not an error). Sets the matching
    /// timestamp (`delivered_at` / `opened_at` / `failed_at`) and the error
    /// code/reason when present.
    async fn apply_status(
        &self,
        id: Uuid,
        status: MessageStatus,
        at: DateTime<Utc>,
        error_code: Option<&str>,
        error_reason: Option<&str>,
    ) -> Result<bool, StorageError>;

    /// Tenant-wide count of non-failed outbound messages created since
    /// `since`. Input to the daily send cap.
    async fn count_outbound_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// When the contact last wrote to us on `channel`. Input to the
    /// WhatsApp session-window rule.
    async fn last_inbound_at(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<DateTime<Utc>>, StorageError>;
}

/// Append-only provider event log.
#[async_trait]
pub trait MessageEventStore: Send + Sync {
    /// Record an event, enforcing the `(provider, provider_event_id)` unique
    /// constraint. A duplicate returns `EventInsert::Duplicate` instead of an
    /// error — this is the webhook idempotency guard.
    async fn record_event(&self, event: MessageEvent) -> Result<EventInsert, StorageError>;

    /// Whether an event id has already been recorded for a provider.
    async fn event_exists(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<bool, StorageError>;
}
