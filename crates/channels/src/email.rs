//! Email channel (SendGrid-shaped provider API).
//!
//! Outbound sends go through `POST /v3/mail/send`; the provider-assigned
//! message id arrives in the `X-Message-Id` response header. Status
//! callbacks arrive as a JSON array of event objects signed with
//! HMAC-SHA256 over `"{timestamp}.{body}"`.

use std::collections::HashMap;
use std::sync::Arc;

use outflow_core::{ChannelKind, Clock, Contact, DeadLetterKind, MessageEventType, Template};
use outflow_storage::EngineStore;
use uuid::Uuid;

use crate::config::{ChannelConfigProvider, EmailConfig};
use crate::error::ChannelError;
use crate::http::RetryClient;
use crate::signature::verify_email_signature;
use crate::traits::MessageChannel;
use crate::types::{SendResult, WebhookResult};
use crate::webhook::{apply_status_event, StatusEvent};

pub const EMAIL_PROVIDER: &str = "sendgrid";

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

pub struct EmailChannel {
    store: Arc<dyn EngineStore>,
    configs: ChannelConfigProvider,
    client: RetryClient,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl EmailChannel {
    /// # Errors
    /// Propagates HTTP client construction failure.
    pub fn new(
        store: Arc<dyn EngineStore>,
        configs: ChannelConfigProvider,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            store,
            configs,
            client: RetryClient::new()?,
            clock,
            base_url: DEFAULT_BASE_URL.to_owned(),
        })
    }

    /// Point the channel at a different API host (test servers).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn deliver(
        &self,
        contact: &Contact,
        subject: &str,
        body: &str,
    ) -> Result<String, ChannelError> {
        let to_email = contact
            .email
            .as_deref()
            .filter(|e| e.contains('@'))
            .ok_or_else(|| ChannelError::InvalidAddress("contact has no email".to_owned()))?;
        let config = self.configs.email_config(contact.tenant_id).await?;

        let mut from = serde_json::json!({ "email": config.from_email });
        if let Some(name) = &config.from_name {
            from["name"] = serde_json::Value::String(name.clone());
        }
        let payload = serde_json::json!({
            "personalizations": [{ "to": [{ "email": to_email }] }],
            "from": from,
            "subject": subject,
            "content": [{ "type": "text/plain", "value": body }],
        });

        let url = format!("{}/v3/mail/send", self.base_url);
        let response = self
            .client
            .execute(move |client| {
                client.post(&url).bearer_auth(&config.api_key).json(&payload)
            })
            .await?;

        response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                ChannelError::InvalidResponse("missing X-Message-Id header".to_owned())
            })
    }

    fn verify(
        &self,
        config: &EmailConfig,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<(), &'static str> {
        let (Some(signature), Some(timestamp)) =
            (headers.get("x-mailer-signature"), headers.get("x-mailer-timestamp"))
        else {
            return Err("signature_missing");
        };
        if verify_email_signature(&config.webhook_signing_key, timestamp, raw_body, signature) {
            Ok(())
        } else {
            Err("invalid_signature")
        }
    }
}

fn event_type_for(event: &str) -> Option<MessageEventType> {
    match event {
        "processed" => Some(MessageEventType::Sent),
        "delivered" => Some(MessageEventType::Delivered),
        "open" => Some(MessageEventType::Opened),
        "bounce" => Some(MessageEventType::Bounced),
        "dropped" => Some(MessageEventType::Failed),
        _ => None,
    }
}

#[async_trait::async_trait]
impl MessageChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send_text(
        &self,
        contact: &Contact,
        text: &str,
        meta: Option<&serde_json::Value>,
    ) -> SendResult {
        let subject = meta
            .and_then(|m| m.get("subject"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("New message");
        match self.deliver(contact, subject, text).await {
            Ok(id) => SendResult::ok(id),
            Err(e) => SendResult::fail(e.to_string()),
        }
    }

    async fn send_template(
        &self,
        contact: &Contact,
        template: &Template,
        variables: &serde_json::Value,
        meta: Option<&serde_json::Value>,
    ) -> SendResult {
        let body = template.render(variables);
        self.send_text(contact, &body, meta).await
    }

    async fn validate_template(&self, template: &Template) -> bool {
        template.channel == ChannelKind::Email && !template.body.trim().is_empty()
    }

    async fn handle_webhook(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> WebhookResult {
        let Some(tenant_id) =
            headers.get("x-tenant-id").and_then(|v| Uuid::parse_str(v).ok())
        else {
            return WebhookResult::rejected("missing tenant");
        };
        let config = match self.configs.email_config(tenant_id).await {
            Ok(c) => c,
            Err(e) => return WebhookResult::rejected(e.to_string()),
        };
        if let Err(reason) = self.verify(&config, raw_body, headers) {
            return WebhookResult::rejected(reason);
        }

        let events: Vec<serde_json::Value> = match serde_json::from_slice(raw_body) {
            Ok(v) => v,
            Err(e) => return WebhookResult::rejected(format!("malformed payload: {e}")),
        };

        let now = self.clock.now_utc();
        for raw in events {
            let Some(event_name) = raw.get("event").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let Some(event_type) = event_type_for(event_name) else {
                tracing::debug!(event = event_name, "ignoring email event type");
                continue;
            };
            let Some(message_id) =
                raw.get("sg_message_id").and_then(serde_json::Value::as_str)
            else {
                continue;
            };
            // SendGrid truncates the queue suffix inconsistently across
            // events; keep only the stable id part.
            let message_id = message_id.split('.').next().unwrap_or(message_id).to_owned();
            let event_id = raw
                .get("sg_event_id")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{message_id}:{event_name}"));
            let occurred_at = raw
                .get("timestamp")
                .and_then(serde_json::Value::as_i64)
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));
            let error_reason =
                raw.get("reason").and_then(serde_json::Value::as_str).map(str::to_owned);

            let result = apply_status_event(
                &self.store,
                StatusEvent {
                    tenant_id,
                    provider: EMAIL_PROVIDER.to_owned(),
                    provider_event_id: event_id,
                    provider_message_id: message_id,
                    event_type,
                    occurred_at,
                    error_code: None,
                    error_reason,
                    payload: raw,
                },
                now,
            )
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to apply email event");
                return WebhookResult::rejected_as(DeadLetterKind::Status, e.to_string());
            }
        }

        WebhookResult::accepted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outflow_core::{
        ManualClock, Message, MessageDirection, MessageKind, MessageStatus,
    };
    use outflow_storage::{ChannelConfigRecord, MemoryStorage};
    use crate::secrets::SecretCipher;
    use crate::signature::email_signature;

    const SIGNING_KEY: &str = "test-signing-key";

    async fn channel_with_store() -> (EmailChannel, Arc<dyn EngineStore>, Uuid) {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStorage::new());
        let tenant_id = Uuid::new_v4();
        store
            .upsert_channel_config(ChannelConfigRecord {
                tenant_id,
                channel: ChannelKind::Email,
                settings: serde_json::json!({
                    "api_key": "sk-test",
                    "from_email": "out@acme.test",
                    "webhook_signing_key": SIGNING_KEY,
                }),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let configs =
            ChannelConfigProvider::new(Arc::clone(&store), SecretCipher::new(&[1u8; 32]));
        let channel =
            EmailChannel::new(Arc::clone(&store), configs, Arc::new(ManualClock::new(Utc::now())))
                .unwrap();
        (channel, store, tenant_id)
    }

    fn signed_headers(tenant_id: Uuid, body: &[u8]) -> HashMap<String, String> {
        let timestamp = "1700000000";
        let mut headers = HashMap::new();
        headers.insert("x-tenant-id".to_owned(), tenant_id.to_string());
        headers.insert("x-mailer-timestamp".to_owned(), timestamp.to_owned());
        headers.insert(
            "x-mailer-signature".to_owned(),
            email_signature(SIGNING_KEY, timestamp, body),
        );
        headers
    }

    fn seed_sent_message(tenant_id: Uuid, pmid: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            tenant_id,
            conversation_id: Uuid::new_v4(),
            channel: ChannelKind::Email,
            direction: MessageDirection::Out,
            kind: MessageKind::Text,
            template_name: None,
            payload: serde_json::json!({ "text": "hello" }),
            status: MessageStatus::Sent,
            provider: Some(EMAIL_PROVIDER.to_owned()),
            provider_message_id: Some(pmid.to_owned()),
            delivered_at: None,
            opened_at: None,
            failed_at: None,
            error_code: None,
            error_reason: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let (channel, _store, tenant_id) = channel_with_store().await;
        let body = br#"[{"event":"delivered","sg_message_id":"m1"}]"#;
        let mut headers = signed_headers(tenant_id, body);
        headers.insert("x-mailer-signature".to_owned(), "deadbeef".to_owned());

        let result = channel.handle_webhook(body, &headers).await;
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("invalid_signature"));

        headers.remove("x-mailer-signature");
        let result = channel.handle_webhook(body, &headers).await;
        assert_eq!(result.reason.as_deref(), Some("signature_missing"));
    }

    #[tokio::test]
    async fn test_webhook_applies_delivered_event() {
        let (channel, store, tenant_id) = channel_with_store().await;
        let message = seed_sent_message(tenant_id, "m1");
        let id = message.id;
        store.insert_message(message).await.unwrap();

        let body = serde_json::to_vec(&serde_json::json!([{
            "event": "delivered",
            "sg_message_id": "m1.filter001",
            "sg_event_id": "evt-1",
        }]))
        .unwrap();
        let headers = signed_headers(tenant_id, &body);

        let result = channel.handle_webhook(&body, &headers).await;
        assert!(result.ok);
        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_webhook_ignores_unknown_event_types() {
        let (channel, store, tenant_id) = channel_with_store().await;
        let body = serde_json::to_vec(&serde_json::json!([{
            "event": "spamreport",
            "sg_message_id": "m2",
            "sg_event_id": "evt-2",
        }]))
        .unwrap();
        let headers = signed_headers(tenant_id, &body);

        let result = channel.handle_webhook(&body, &headers).await;
        assert!(result.ok);
        assert!(!store.event_exists(EMAIL_PROVIDER, "evt-2").await.unwrap());
    }
}
