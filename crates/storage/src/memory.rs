//! In-memory backend with the same semantics as the PostgreSQL backend.
//!
//! Used by deterministic tests and available as a storage choice for
//! single-process setups. Claim atomicity comes from the table mutex; unique
//! constraints are emulated explicitly so idempotency behavior matches
//! Postgres exactly.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::{
    ChannelKind, Contact, Conversation, DeadLetterStatus, FailureCode, Message, MessageDirection,
    MessageEvent, MessageStatus, OutboxMessage, OutboxStatus, RateLimitSnapshot, Template,
    WebhookDeadLetterItem,
};

use crate::error::StorageError;
use crate::traits::{
    ChannelConfigStore, ContactStore, ConversationStore, DeadLetterStore, MessageEventStore,
    MessageStore, OutboxStore, RateLimitStore, TemplateStore,
};
use crate::types::{ChannelConfigRecord, EventInsert};

#[derive(Default)]
struct Tables {
    outbox: HashMap<Uuid, OutboxMessage>,
    messages: HashMap<Uuid, Message>,
    events: Vec<MessageEvent>,
    event_keys: HashSet<(String, String)>,
    contacts: HashMap<Uuid, Contact>,
    conversations: HashMap<Uuid, Conversation>,
    snapshots: HashMap<(Uuid, String), RateLimitSnapshot>,
    dead_letters: HashMap<Uuid, WebhookDeadLetterItem>,
    channel_configs: HashMap<(Uuid, ChannelKind), ChannelConfigRecord>,
    templates: HashMap<Uuid, Template>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// All recorded events, for test assertions.
    #[must_use]
    pub fn events(&self) -> Vec<MessageEvent> {
        self.lock().events.clone()
    }

    /// All messages, for test assertions.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.values().cloned().collect()
    }
}

#[async_trait]
impl OutboxStore for MemoryStorage {
    async fn enqueue(&self, job: OutboxMessage) -> Result<Uuid, StorageError> {
        let id = job.id;
        self.lock().outbox.insert(id, job);
        Ok(id)
    }

    async fn claim_due(
        &self,
        limit: usize,
        lease_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, StorageError> {
        let mut tables = self.lock();
        let mut eligible: Vec<Uuid> = tables
            .outbox
            .values()
            .filter(|job| match job.status {
                OutboxStatus::Queued => job.is_due(now) && job.lease_expired(now),
                // Crash recovery: an expired lease makes a Sending row reclaimable.
                OutboxStatus::Sending => job.lease_expired(now),
                OutboxStatus::Sent | OutboxStatus::Failed => false,
            })
            .map(|job| job.id)
            .collect();
        eligible.sort_by_key(|id| {
            tables.outbox.get(id).map(|job| job.created_at).unwrap_or(now)
        });
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(job) = tables.outbox.get_mut(&id) {
                job.status = OutboxStatus::Sending;
                job.locked_until = Some(now + chrono::Duration::seconds(lease_secs));
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), StorageError> {
        self.update_outbox(id, |job| {
            job.status = OutboxStatus::Sent;
            job.locked_until = None;
        })
    }

    async fn reschedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.update_outbox(id, |job| {
            job.status = OutboxStatus::Queued;
            job.scheduled_at = Some(at);
            job.locked_until = None;
        })
    }

    async fn release(&self, id: Uuid) -> Result<(), StorageError> {
        self.update_outbox(id, |job| {
            job.status = OutboxStatus::Queued;
            job.locked_until = None;
        })
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.update_outbox(id, |job| {
            job.attempts += 1;
            job.last_error = Some(error.to_owned());
            job.locked_until = None;
            match retry_at {
                Some(at) => {
                    job.status = OutboxStatus::Queued;
                    job.scheduled_at = Some(at);
                },
                None => job.status = OutboxStatus::Failed,
            }
        })
    }

    async fn fail_permanent(&self, id: Uuid, code: FailureCode) -> Result<(), StorageError> {
        self.update_outbox(id, |job| {
            job.status = OutboxStatus::Failed;
            job.last_error = Some(code.as_str().to_owned());
            job.locked_until = None;
        })
    }

    async fn get_outbox_message(&self, id: Uuid) -> Result<Option<OutboxMessage>, StorageError> {
        Ok(self.lock().outbox.get(&id).cloned())
    }

    async fn outbox_depth(&self) -> Result<u64, StorageError> {
        let depth = self
            .lock()
            .outbox
            .values()
            .filter(|job| job.status == OutboxStatus::Queued)
            .count();
        Ok(depth as u64)
    }
}

impl MemoryStorage {
    fn update_outbox(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut OutboxMessage),
    ) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let job = tables
            .outbox
            .get_mut(&id)
            .ok_or(StorageError::NotFound { entity: "outbox_message", id: id.to_string() })?;
        apply(job);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStorage {
    async fn insert_message(&self, message: Message) -> Result<(), StorageError> {
        let mut tables = self.lock();
        if let (Some(provider), Some(provider_message_id)) =
            (message.provider.as_deref(), message.provider_message_id.as_deref())
        {
            let duplicate = tables.messages.values().any(|existing| {
                existing.tenant_id == message.tenant_id
                    && existing.provider.as_deref() == Some(provider)
                    && existing.provider_message_id.as_deref() == Some(provider_message_id)
            });
            if duplicate {
                return Err(StorageError::Duplicate(format!(
                    "message for provider {provider} id {provider_message_id}"
                )));
            }
        }
        tables.messages.insert(message.id, message);
        Ok(())
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StorageError> {
        Ok(self.lock().messages.get(&id).cloned())
    }

    async fn find_by_provider_id(
        &self,
        tenant_id: Uuid,
        provider: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StorageError> {
        Ok(self
            .lock()
            .messages
            .values()
            .find(|message| {
                message.tenant_id == tenant_id
                    && message.provider.as_deref() == Some(provider)
                    && message.provider_message_id.as_deref() == Some(provider_message_id)
            })
            .cloned())
    }

    async fn apply_status(
        &self,
        id: Uuid,
        status: MessageStatus,
        at: DateTime<Utc>,
        error_code: Option<&str>,
        error_reason: Option<&str>,
    ) -> Result<bool, StorageError> {
        let mut tables = self.lock();
        let message = tables
            .messages
            .get_mut(&id)
            .ok_or(StorageError::NotFound { entity: "message", id: id.to_string() })?;
        if !message.status.allows_transition_to(status) {
            return Ok(false);
        }
        message.status = status;
        match status {
            MessageStatus::Delivered => message.delivered_at = Some(at),
            MessageStatus::Opened => {
                message.opened_at = Some(at);
                if message.delivered_at.is_none() {
                    message.delivered_at = Some(at);
                }
            },
            MessageStatus::Failed | MessageStatus::Bounced => message.failed_at = Some(at),
            MessageStatus::Queued | MessageStatus::Sent => {},
        }
        if let Some(code) = error_code {
            message.error_code = Some(code.to_owned());
        }
        if let Some(reason) = error_reason {
            message.error_reason = Some(reason.to_owned());
        }
        Ok(true)
    }

    async fn count_outbound_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let count = self
            .lock()
            .messages
            .values()
            .filter(|message| {
                message.tenant_id == tenant_id
                    && message.direction == MessageDirection::Out
                    && message.created_at >= since
                    && !matches!(message.status, MessageStatus::Failed | MessageStatus::Bounced)
            })
            .count();
        Ok(count as u64)
    }

    async fn last_inbound_at(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let tables = self.lock();
        let last = tables
            .messages
            .values()
            .filter(|message| {
                message.tenant_id == tenant_id
                    && message.channel == channel
                    && message.direction == MessageDirection::In
                    && tables
                        .conversations
                        .get(&message.conversation_id)
                        .is_some_and(|conversation| conversation.contact_id == contact_id)
            })
            .map(|message| message.created_at)
            .max();
        Ok(last)
    }
}

#[async_trait]
impl MessageEventStore for MemoryStorage {
    async fn record_event(&self, event: MessageEvent) -> Result<EventInsert, StorageError> {
        let mut tables = self.lock();
        let key = (event.provider.clone(), event.provider_event_id.clone());
        if tables.event_keys.contains(&key) {
            return Ok(EventInsert::Duplicate);
        }
        tables.event_keys.insert(key);
        tables.events.push(event);
        Ok(EventInsert::Inserted)
    }

    async fn event_exists(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<bool, StorageError> {
        Ok(self
            .lock()
            .event_keys
            .contains(&(provider.to_owned(), provider_event_id.to_owned())))
    }
}

#[async_trait]
impl ContactStore for MemoryStorage {
    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>, StorageError> {
        Ok(self.lock().contacts.get(&id).cloned())
    }

    async fn find_contact_by_phone(
        &self,
        tenant_id: Uuid,
        phone: &str,
    ) -> Result<Option<Contact>, StorageError> {
        Ok(self
            .lock()
            .contacts
            .values()
            .find(|contact| {
                contact.tenant_id == tenant_id && contact.phone.as_deref() == Some(phone)
            })
            .cloned())
    }

    async fn find_contact_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<Contact>, StorageError> {
        let email = email.to_ascii_lowercase();
        Ok(self
            .lock()
            .contacts
            .values()
            .find(|contact| {
                contact.tenant_id == tenant_id
                    && contact.email.as_deref().map(str::to_ascii_lowercase) == Some(email.clone())
            })
            .cloned())
    }

    async fn upsert_contact(&self, contact: Contact) -> Result<(), StorageError> {
        self.lock().contacts.insert(contact.id, contact);
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStorage {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, StorageError> {
        Ok(self.lock().conversations.get(&id).cloned())
    }

    async fn find_latest_conversation(
        &self,
        tenant_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<Conversation>, StorageError> {
        Ok(self
            .lock()
            .conversations
            .values()
            .filter(|conversation| {
                conversation.tenant_id == tenant_id
                    && conversation.contact_id == contact_id
                    && conversation.channel == channel
            })
            .max_by_key(|conversation| conversation.created_at)
            .cloned())
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StorageError> {
        self.lock().conversations.insert(conversation.id, conversation);
        Ok(())
    }

    async fn touch_conversation(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let conversation = tables
            .conversations
            .get_mut(&id)
            .ok_or(StorageError::NotFound { entity: "conversation", id: id.to_string() })?;
        conversation.last_message_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl RateLimitStore for MemoryStorage {
    async fn load_snapshot(
        &self,
        target_tenant_id: Uuid,
        scope: &str,
    ) -> Result<Option<RateLimitSnapshot>, StorageError> {
        Ok(self.lock().snapshots.get(&(target_tenant_id, scope.to_owned())).cloned())
    }

    async fn save_snapshot(&self, snapshot: &RateLimitSnapshot) -> Result<(), StorageError> {
        self.lock()
            .snapshots
            .insert((snapshot.target_tenant_id, snapshot.scope.clone()), snapshot.clone());
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStorage {
    async fn push_dead_letter(&self, item: WebhookDeadLetterItem) -> Result<Uuid, StorageError> {
        let id = item.id;
        self.lock().dead_letters.insert(id, item);
        Ok(id)
    }

    async fn due_dead_letters(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDeadLetterItem>, StorageError> {
        let mut due: Vec<WebhookDeadLetterItem> = self
            .lock()
            .dead_letters
            .values()
            .filter(|item| {
                item.status == DeadLetterStatus::Pending
                    && item.next_attempt_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|item| item.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_dead_letter_success(&self, id: Uuid) -> Result<(), StorageError> {
        self.update_dead_letter(id, |item| {
            item.status = DeadLetterStatus::Resolved;
            item.next_attempt_at = None;
        })
    }

    async fn mark_dead_letter_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.update_dead_letter(id, |item| {
            item.retry_count += 1;
            item.last_error = Some(error.to_owned());
            item.next_attempt_at = Some(next_attempt_at);
        })
    }

    async fn mark_dead_letter_exhausted(&self, id: Uuid, error: &str) -> Result<(), StorageError> {
        self.update_dead_letter(id, |item| {
            item.retry_count += 1;
            item.last_error = Some(error.to_owned());
            item.status = DeadLetterStatus::Exhausted;
            item.next_attempt_at = None;
        })
    }

    async fn get_dead_letter(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookDeadLetterItem>, StorageError> {
        Ok(self.lock().dead_letters.get(&id).cloned())
    }

    async fn dead_letter_depth(&self) -> Result<u64, StorageError> {
        let depth = self
            .lock()
            .dead_letters
            .values()
            .filter(|item| item.status == DeadLetterStatus::Pending)
            .count();
        Ok(depth as u64)
    }
}

impl MemoryStorage {
    fn update_dead_letter(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut WebhookDeadLetterItem),
    ) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let item = tables
            .dead_letters
            .get_mut(&id)
            .ok_or(StorageError::NotFound { entity: "webhook_dead_letter", id: id.to_string() })?;
        apply(item);
        Ok(())
    }
}

#[async_trait]
impl ChannelConfigStore for MemoryStorage {
    async fn get_channel_config(
        &self,
        tenant_id: Uuid,
        channel: ChannelKind,
    ) -> Result<Option<ChannelConfigRecord>, StorageError> {
        Ok(self.lock().channel_configs.get(&(tenant_id, channel)).cloned())
    }

    async fn upsert_channel_config(
        &self,
        record: ChannelConfigRecord,
    ) -> Result<(), StorageError> {
        self.lock().channel_configs.insert((record.tenant_id, record.channel), record);
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for MemoryStorage {
    async fn get_template(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Template>, StorageError> {
        Ok(self
            .lock()
            .templates
            .get(&id)
            .filter(|template| template.tenant_id == tenant_id)
            .cloned())
    }

    async fn upsert_template(&self, template: Template) -> Result<(), StorageError> {
        self.lock().templates.insert(template.id, template);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use outflow_core::{MessageKind, NewOutboxMessage};

    fn text_job(now: DateTime<Utc>) -> OutboxMessage {
        NewOutboxMessage::text(Uuid::new_v4(), Uuid::new_v4(), ChannelKind::Sms, "hello")
            .into_message(now)
    }

    fn out_message(tenant_id: Uuid, conversation_id: Uuid, now: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            tenant_id,
            conversation_id,
            channel: ChannelKind::Sms,
            direction: MessageDirection::Out,
            kind: MessageKind::Text,
            template_name: None,
            payload: serde_json::json!({ "text": "hello" }),
            status: MessageStatus::Sent,
            provider: Some("twilio".to_owned()),
            provider_message_id: Some("SM1".to_owned()),
            delivered_at: None,
            opened_at: None,
            failed_at: None,
            error_code: None,
            error_reason: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_claim_marks_sending_and_leases() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let id = storage.enqueue(text_job(now)).await.unwrap();

        let claimed = storage.claim_due(10, 120, now).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, OutboxStatus::Sending);

        // A second claim while the lease is live sees nothing.
        let again = storage.claim_due(10, 120, now).await.unwrap();
        assert!(again.is_empty());

        let job = storage.get_outbox_message(id).await.unwrap().unwrap();
        assert_eq!(job.locked_until, Some(now + Duration::seconds(120)));
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        storage.enqueue(text_job(now)).await.unwrap();

        let first = storage.claim_due(10, 60, now).await.unwrap();
        assert_eq!(first.len(), 1);

        // Worker crashed; two minutes later another worker wins the row.
        let later = now + Duration::seconds(121);
        let second = storage.claim_due(10, 60, later).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
    }

    #[tokio::test]
    async fn test_scheduled_jobs_not_claimed_early() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let mut job = text_job(now);
        job.scheduled_at = Some(now + Duration::hours(1));
        storage.enqueue(job).await.unwrap();

        assert!(storage.claim_due(10, 60, now).await.unwrap().is_empty());
        assert_eq!(
            storage.claim_due(10, 60, now + Duration::hours(2)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_record_failure_requeues_then_fails() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let id = storage.enqueue(text_job(now)).await.unwrap();

        storage.record_failure(id, "timeout", Some(now + Duration::minutes(1))).await.unwrap();
        let job = storage.get_outbox_message(id).await.unwrap().unwrap();
        assert_eq!(job.status, OutboxStatus::Queued);
        assert_eq!(job.attempts, 1);

        storage.record_failure(id, "timeout", None).await.unwrap();
        let job = storage.get_outbox_message(id).await.unwrap().unwrap();
        assert_eq!(job.status, OutboxStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_event_record_is_idempotent() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let event = MessageEvent::new(
            Uuid::new_v4(),
            None,
            "twilio",
            "SM1:delivered",
            outflow_core::MessageEventType::Delivered,
            serde_json::json!({}),
            now,
        );

        assert_eq!(storage.record_event(event.clone()).await.unwrap(), EventInsert::Inserted);
        let replay = MessageEvent { id: Uuid::new_v4(), ..event };
        assert_eq!(storage.record_event(replay).await.unwrap(), EventInsert::Duplicate);
        assert_eq!(storage.events().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_status_is_monotonic() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let tenant_id = Uuid::new_v4();
        let message = out_message(tenant_id, Uuid::new_v4(), now);
        let id = message.id;
        storage.insert_message(message).await.unwrap();

        assert!(storage
            .apply_status(id, MessageStatus::Delivered, now, None, None)
            .await
            .unwrap());
        // Late "sent" callback must not regress the status.
        assert!(!storage.apply_status(id, MessageStatus::Sent, now, None, None).await.unwrap());
        let message = storage.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        assert!(message.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_provider_message_id_rejected() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let tenant_id = Uuid::new_v4();
        storage.insert_message(out_message(tenant_id, Uuid::new_v4(), now)).await.unwrap();

        let duplicate = out_message(tenant_id, Uuid::new_v4(), now);
        let err = storage.insert_message(duplicate).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_last_inbound_at_joins_conversations() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let tenant_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();
        let conversation = Conversation::new(tenant_id, contact_id, ChannelKind::Sms, now);
        let conversation_id = conversation.id;
        storage.create_conversation(conversation).await.unwrap();

        let mut inbound = out_message(tenant_id, conversation_id, now - Duration::hours(2));
        inbound.direction = MessageDirection::In;
        inbound.provider_message_id = Some("SM-in".to_owned());
        storage.insert_message(inbound).await.unwrap();

        let last = storage
            .last_inbound_at(tenant_id, contact_id, ChannelKind::Sms)
            .await
            .unwrap();
        assert_eq!(last, Some(now - Duration::hours(2)));

        // Other contacts see nothing.
        let none = storage
            .last_inbound_at(tenant_id, Uuid::new_v4(), ChannelKind::Sms)
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_lifecycle() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let item = WebhookDeadLetterItem::new(
            None,
            ChannelKind::WhatsApp,
            "whatsapp",
            outflow_core::DeadLetterKind::Status,
            "{}".to_owned(),
            HashMap::new(),
            "invalid_signature",
            now,
            now,
        );
        let id = storage.push_dead_letter(item).await.unwrap();
        assert_eq!(storage.dead_letter_depth().await.unwrap(), 1);

        let due = storage.due_dead_letters(10, now).await.unwrap();
        assert_eq!(due.len(), 1);

        storage
            .mark_dead_letter_failure(id, "still failing", now + Duration::minutes(5))
            .await
            .unwrap();
        assert!(storage.due_dead_letters(10, now).await.unwrap().is_empty());
        let item = storage.get_dead_letter(id).await.unwrap().unwrap();
        assert_eq!(item.retry_count, 1);

        storage.mark_dead_letter_exhausted(id, "gave up").await.unwrap();
        let item = storage.get_dead_letter(id).await.unwrap().unwrap();
        assert_eq!(item.status, DeadLetterStatus::Exhausted);
        assert!(item.next_attempt_at.is_none());
        assert_eq!(storage.dead_letter_depth().await.unwrap(), 0);
    }
}
