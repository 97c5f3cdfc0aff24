//! Shared webhook application logic used by every channel.
//!
//! Each channel parses its provider-specific payload and signature, then
//! hands normalized events to the appliers here. The appliers own the
//! idempotency and ordering rules:
//!
//! 1. an already-recorded `(provider, provider_event_id)` is a no-op,
//! 2. status transitions go through the monotonic `apply_status`,
//! 3. the event row is recorded last, so a crash between steps replays
//!    safely on the provider's retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use outflow_core::{
    ChannelKind, Conversation, Message, MessageDirection, MessageEvent, MessageEventType,
    MessageKind, MessageStatus,
};
use outflow_storage::{EngineStore, EventInsert};
use uuid::Uuid;

use crate::error::ChannelError;
use crate::phone::normalize_e164;
use crate::types::WebhookResult;

/// A provider delivery-status callback, normalized.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub tenant_id: Uuid,
    pub provider: String,
    pub provider_event_id: String,
    pub provider_message_id: String,
    pub event_type: MessageEventType,
    pub occurred_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
    /// Raw provider envelope, kept for the event log.
    pub payload: serde_json::Value,
}

/// Sender address of an inbound message, as the provider reports it.
#[derive(Debug, Clone)]
pub enum InboundAddress {
    Phone(String),
    Email(String),
}

/// An inbound message callback, normalized.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub tenant_id: Uuid,
    pub channel: ChannelKind,
    pub provider: String,
    pub provider_event_id: String,
    pub provider_message_id: String,
    pub from: InboundAddress,
    pub text: Option<String>,
    pub payload: serde_json::Value,
}

/// Apply a status callback to its canonical message.
///
/// Replays and callbacks for unknown messages are accepted: returning an
/// error would only make the provider retry something we will never apply.
///
/// # Errors
/// Storage failures only; these are transient and worth a provider retry.
pub async fn apply_status_event(
    store: &Arc<dyn EngineStore>,
    event: StatusEvent,
    now: DateTime<Utc>,
) -> Result<WebhookResult, ChannelError> {
    if store.event_exists(&event.provider, &event.provider_event_id).await? {
        tracing::debug!(
            provider = %event.provider,
            event_id = %event.provider_event_id,
            "duplicate webhook event, skipping"
        );
        return Ok(WebhookResult::accepted());
    }

    let Some(message) = store
        .find_by_provider_id(event.tenant_id, &event.provider, &event.provider_message_id)
        .await?
    else {
        tracing::warn!(
            provider = %event.provider,
            provider_message_id = %event.provider_message_id,
            "status event for unknown message, dropping"
        );
        return Ok(WebhookResult::accepted());
    };

    if let Some(status) = event.event_type.as_status() {
        let at = event.occurred_at.unwrap_or(now);
        let applied = store
            .apply_status(
                message.id,
                status,
                at,
                event.error_code.as_deref(),
                event.error_reason.as_deref(),
            )
            .await?;
        if !applied {
            tracing::debug!(
                message_id = %message.id,
                status = status.as_str(),
                current = message.status.as_str(),
                "out-of-order status event, transition refused"
            );
        }
    }

    let insert = store
        .record_event(MessageEvent::new(
            event.tenant_id,
            Some(message.id),
            &event.provider,
            &event.provider_event_id,
            event.event_type,
            event.payload,
            now,
        ))
        .await?;
    if insert == EventInsert::Duplicate {
        tracing::debug!(event_id = %event.provider_event_id, "event raced a concurrent insert");
    }

    Ok(WebhookResult::accepted())
}

/// Apply an inbound message callback: resolve the contact, find or create
/// the conversation, insert the canonical `In` message, record the event.
///
/// Messages from unknown senders are logged and dropped.
///
/// # Errors
/// Storage failures only.
pub async fn apply_inbound_message(
    store: &Arc<dyn EngineStore>,
    inbound: InboundMessage,
    now: DateTime<Utc>,
) -> Result<WebhookResult, ChannelError> {
    if store.event_exists(&inbound.provider, &inbound.provider_event_id).await? {
        return Ok(WebhookResult::accepted());
    }

    let contact = match &inbound.from {
        InboundAddress::Phone(raw) => match normalize_e164(raw) {
            Some(phone) => store.find_contact_by_phone(inbound.tenant_id, &phone).await?,
            None => {
                tracing::warn!(
                    tenant_id = %inbound.tenant_id,
                    "inbound message with unparseable sender number, dropping"
                );
                return Ok(WebhookResult::accepted());
            },
        },
        InboundAddress::Email(raw) => {
            let email = raw.trim().to_ascii_lowercase();
            store.find_contact_by_email(inbound.tenant_id, &email).await?
        },
    };
    let Some(contact) = contact else {
        tracing::warn!(
            tenant_id = %inbound.tenant_id,
            channel = inbound.channel.as_str(),
            "inbound message from unknown sender, dropping"
        );
        return Ok(WebhookResult::accepted());
    };

    let conversation = match store
        .find_latest_conversation(inbound.tenant_id, contact.id, inbound.channel)
        .await?
    {
        Some(c) => c,
        None => {
            let c = Conversation::new(inbound.tenant_id, contact.id, inbound.channel, now);
            store.create_conversation(c.clone()).await?;
            c
        },
    };

    let message = Message {
        id: Uuid::new_v4(),
        tenant_id: inbound.tenant_id,
        conversation_id: conversation.id,
        channel: inbound.channel,
        direction: MessageDirection::In,
        kind: MessageKind::Text,
        template_name: None,
        payload: serde_json::json!({ "text": inbound.text }),
        status: MessageStatus::Delivered,
        provider: Some(inbound.provider.clone()),
        provider_message_id: Some(inbound.provider_message_id.clone()),
        delivered_at: Some(now),
        opened_at: None,
        failed_at: None,
        error_code: None,
        error_reason: None,
        created_at: now,
    };
    let message_id = message.id;
    store.insert_message(message).await?;

    store
        .record_event(MessageEvent::new(
            inbound.tenant_id,
            Some(message_id),
            &inbound.provider,
            &inbound.provider_event_id,
            MessageEventType::Inbound,
            inbound.payload,
            now,
        ))
        .await?;

    store.touch_conversation(conversation.id, now).await?;

    Ok(WebhookResult::accepted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outflow_core::Contact;
    use outflow_storage::MemoryStorage;

    fn store() -> Arc<dyn EngineStore> {
        Arc::new(MemoryStorage::new())
    }

    fn seed_contact(tenant_id: Uuid, phone: &str) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            tenant_id,
            full_name: Some("Test Contact".to_owned()),
            email: None,
            phone: Some(phone.to_owned()),
            timezone: None,
            tags: Vec::new(),
            opted_out: false,
        }
    }

    fn seed_outbound(tenant_id: Uuid, conversation_id: Uuid, pmid: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            tenant_id,
            conversation_id,
            channel: ChannelKind::Sms,
            direction: MessageDirection::Out,
            kind: MessageKind::Text,
            template_name: None,
            payload: serde_json::json!({ "text": "hi" }),
            status: MessageStatus::Sent,
            provider: Some("twilio".to_owned()),
            provider_message_id: Some(pmid.to_owned()),
            delivered_at: None,
            opened_at: None,
            failed_at: None,
            error_code: None,
            error_reason: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_status_event_moves_message_forward() {
        let store = store();
        let tenant_id = Uuid::new_v4();
        let message = seed_outbound(tenant_id, Uuid::new_v4(), "SM1");
        let id = message.id;
        store.insert_message(message).await.unwrap();

        let result = apply_status_event(
            &store,
            StatusEvent {
                tenant_id,
                provider: "twilio".to_owned(),
                provider_event_id: "SM1:delivered".to_owned(),
                provider_message_id: "SM1".to_owned(),
                event_type: MessageEventType::Delivered,
                occurred_at: None,
                error_code: None,
                error_reason: None,
                payload: serde_json::json!({}),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(result.ok);

        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        assert!(message.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_replayed_event_is_a_noop() {
        let store = store();
        let tenant_id = Uuid::new_v4();
        let message = seed_outbound(tenant_id, Uuid::new_v4(), "SM2");
        let id = message.id;
        store.insert_message(message).await.unwrap();

        let event = StatusEvent {
            tenant_id,
            provider: "twilio".to_owned(),
            provider_event_id: "SM2:delivered".to_owned(),
            provider_message_id: "SM2".to_owned(),
            event_type: MessageEventType::Delivered,
            occurred_at: None,
            error_code: None,
            error_reason: None,
            payload: serde_json::json!({}),
        };
        apply_status_event(&store, event.clone(), Utc::now()).await.unwrap();
        apply_status_event(&store, event, Utc::now()).await.unwrap();

        assert!(store.event_exists("twilio", "SM2:delivered").await.unwrap());
        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_out_of_order_status_does_not_regress() {
        let store = store();
        let tenant_id = Uuid::new_v4();
        let message = seed_outbound(tenant_id, Uuid::new_v4(), "SM3");
        let id = message.id;
        store.insert_message(message).await.unwrap();

        for (event_id, event_type) in
            [("SM3:delivered", MessageEventType::Delivered), ("SM3:sent", MessageEventType::Sent)]
        {
            apply_status_event(
                &store,
                StatusEvent {
                    tenant_id,
                    provider: "twilio".to_owned(),
                    provider_event_id: event_id.to_owned(),
                    provider_message_id: "SM3".to_owned(),
                    event_type,
                    occurred_at: None,
                    error_code: None,
                    error_reason: None,
                    payload: serde_json::json!({}),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        }

        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_inbound_creates_conversation_and_message() {
        let store = store();
        let tenant_id = Uuid::new_v4();
        let contact = seed_contact(tenant_id, "+15550002222");
        let contact_id = contact.id;
        store.upsert_contact(contact).await.unwrap();

        let now = Utc::now();
        let result = apply_inbound_message(
            &store,
            InboundMessage {
                tenant_id,
                channel: ChannelKind::Sms,
                provider: "twilio".to_owned(),
                provider_event_id: "SM4:in".to_owned(),
                provider_message_id: "SM4".to_owned(),
                from: InboundAddress::Phone("+1 (555) 000-2222".to_owned()),
                text: Some("hello back".to_owned()),
                payload: serde_json::json!({}),
            },
            now,
        )
        .await
        .unwrap();
        assert!(result.ok);

        let conversation = store
            .find_latest_conversation(tenant_id, contact_id, ChannelKind::Sms)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conversation.last_message_at, Some(now));
        assert_eq!(
            store.last_inbound_at(tenant_id, contact_id, ChannelKind::Sms).await.unwrap(),
            Some(now)
        );
    }

    #[tokio::test]
    async fn test_inbound_from_unknown_sender_is_dropped() {
        let store = store();
        let result = apply_inbound_message(
            &store,
            InboundMessage {
                tenant_id: Uuid::new_v4(),
                channel: ChannelKind::Sms,
                provider: "twilio".to_owned(),
                provider_event_id: "SM5:in".to_owned(),
                provider_message_id: "SM5".to_owned(),
                from: InboundAddress::Phone("+15559998888".to_owned()),
                text: Some("who dis".to_owned()),
                payload: serde_json::json!({}),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(result.ok);
        assert!(!store.event_exists("twilio", "SM5:in").await.unwrap());
    }
}
