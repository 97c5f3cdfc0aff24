use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::WebhookDeadLetterItem;

use crate::error::StorageError;

/// Durable queue of failed webhook deliveries.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Store a failed delivery for later replay. Returns the item id.
    async fn push_dead_letter(&self, item: WebhookDeadLetterItem) -> Result<Uuid, StorageError>;

    /// Pending items whose `next_attempt_at` has passed, oldest first.
    async fn due_dead_letters(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDeadLetterItem>, StorageError>;

    /// Replay succeeded: mark resolved.
    async fn mark_dead_letter_success(&self, id: Uuid) -> Result<(), StorageError>;

    /// Replay failed: record the error, bump the retry count, reschedule.
    async fn mark_dead_letter_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Retry ceiling reached: park for manual inspection, never scheduled
    /// again, never deleted.
    async fn mark_dead_letter_exhausted(&self, id: Uuid, error: &str) -> Result<(), StorageError>;

    async fn get_dead_letter(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookDeadLetterItem>, StorageError>;

    /// Number of items pending replay.
    async fn dead_letter_depth(&self) -> Result<u64, StorageError>;
}
