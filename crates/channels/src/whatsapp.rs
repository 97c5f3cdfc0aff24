//! WhatsApp channel (Cloud API).
//!
//! Outbound sends go through `POST /{phone_number_id}/messages` with a
//! bearer token; the provider message id (`wamid...`) comes back in
//! `messages[0].id`. Webhooks carry both status updates and inbound
//! messages in the `entry[].changes[].value` envelope, signed with
//! `X-Hub-Signature-256` over the raw body.

use std::collections::HashMap;
use std::sync::Arc;

use outflow_core::{ChannelKind, Clock, Contact, DeadLetterKind, MessageEventType, Template};
use outflow_storage::EngineStore;
use uuid::Uuid;

use crate::config::{ChannelConfigProvider, WhatsAppConfig};
use crate::error::ChannelError;
use crate::http::RetryClient;
use crate::phone::normalize_e164;
use crate::signature::verify_whatsapp_signature;
use crate::traits::MessageChannel;
use crate::types::{SendResult, WebhookResult};
use crate::webhook::{
    apply_inbound_message, apply_status_event, InboundAddress, InboundMessage, StatusEvent,
};

pub const WHATSAPP_PROVIDER: &str = "whatsapp";

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0";

pub struct WhatsAppChannel {
    store: Arc<dyn EngineStore>,
    configs: ChannelConfigProvider,
    client: RetryClient,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl WhatsAppChannel {
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
        config: &WhatsAppConfig,
        to: &str,
        body: serde_json::Value,
    ) -> Result<String, ChannelError> {
        let mut payload = body;
        payload["messaging_product"] = serde_json::Value::String("whatsapp".to_owned());
        payload["to"] = serde_json::Value::String(to.trim_start_matches('+').to_owned());

        let url = format!("{}/{}/messages", self.base_url, config.phone_number_id);
        let token = config.access_token.clone();
        let response = self
            .client
            .execute(move |client| client.post(&url).bearer_auth(&token).json(&payload))
            .await?;

        let parsed: serde_json::Value = response.json().await?;
        parsed
            .pointer("/messages/0/id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                ChannelError::InvalidResponse("missing messages[0].id in response".to_owned())
            })
    }

    async fn send_payload(&self, contact: &Contact, body: serde_json::Value) -> SendResult {
        let Some(to) = contact.phone.as_deref().and_then(normalize_e164) else {
            return SendResult::fail("contact has no usable phone number");
        };
        let config = match self.configs.whatsapp_config(contact.tenant_id).await {
            Ok(c) => c,
            Err(e) => return SendResult::fail(e.to_string()),
        };
        match self.deliver(&config, &to, body).await {
            Ok(id) => SendResult::ok(id),
            Err(e) => SendResult::fail(e.to_string()),
        }
    }

    async fn apply_value(
        &self,
        tenant_id: Uuid,
        value: &serde_json::Value,
    ) -> Result<(), (DeadLetterKind, ChannelError)> {
        let now = self.clock.now_utc();

        for status in value
            .get("statuses")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let Some(wamid) = status.get("id").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let Some(name) = status.get("status").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let Some(event_type) = event_type_for(name) else {
                tracing::debug!(status = name, "ignoring whatsapp status");
                continue;
            };
            let occurred_at = status
                .get("timestamp")
                .and_then(serde_json::Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));
            let error_reason = status
                .pointer("/errors/0/title")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned);
            let error_code = status
                .pointer("/errors/0/code")
                .and_then(serde_json::Value::as_i64)
                .map(|c| c.to_string());

            apply_status_event(
                &self.store,
                StatusEvent {
                    tenant_id,
                    provider: WHATSAPP_PROVIDER.to_owned(),
                    provider_event_id: format!("{wamid}:{name}"),
                    provider_message_id: wamid.to_owned(),
                    event_type,
                    occurred_at,
                    error_code,
                    error_reason,
                    payload: status.clone(),
                },
                now,
            )
            .await
            .map_err(|e| (DeadLetterKind::Status, e))?;
        }

        for message in value
            .get("messages")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            let Some(wamid) = message.get("id").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let Some(from) = message.get("from").and_then(serde_json::Value::as_str) else {
                continue;
            };
            let text = message
                .pointer("/text/body")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned);

            apply_inbound_message(
                &self.store,
                InboundMessage {
                    tenant_id,
                    channel: ChannelKind::WhatsApp,
                    provider: WHATSAPP_PROVIDER.to_owned(),
                    provider_event_id: format!("{wamid}:in"),
                    provider_message_id: wamid.to_owned(),
                    // Cloud API reports the sender without a leading plus.
                    from: InboundAddress::Phone(format!("+{from}")),
                    text,
                    payload: message.clone(),
                },
                now,
            )
            .await
            .map_err(|e| (DeadLetterKind::Inbound, e))?;
        }

        Ok(())
    }
}

fn event_type_for(status: &str) -> Option<MessageEventType> {
    match status {
        "sent" => Some(MessageEventType::Sent),
        "delivered" => Some(MessageEventType::Delivered),
        "read" => Some(MessageEventType::Opened),
        "failed" => Some(MessageEventType::Failed),
        _ => None,
    }
}

#[async_trait::async_trait]
impl MessageChannel for WhatsAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn send_text(
        &self,
        contact: &Contact,
        text: &str,
        _meta: Option<&serde_json::Value>,
    ) -> SendResult {
        let body = serde_json::json!({
            "type": "text",
            "text": { "body": text },
        });
        self.send_payload(contact, body).await
    }

    async fn send_template(
        &self,
        contact: &Contact,
        template: &Template,
        variables: &serde_json::Value,
        _meta: Option<&serde_json::Value>,
    ) -> SendResult {
        // Cloud API template components are positional; declared variable
        // order defines the parameter order.
        let parameters: Vec<serde_json::Value> = template
            .variables
            .iter()
            .map(|name| {
                let text = variables
                    .get(name)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                serde_json::json!({ "type": "text", "text": text })
            })
            .collect();
        let mut template_body = serde_json::json!({
            "name": template.name,
            "language": { "code": template.language.as_deref().unwrap_or("en") },
        });
        if !parameters.is_empty() {
            template_body["components"] =
                serde_json::json!([{ "type": "body", "parameters": parameters }]);
        }
        let body = serde_json::json!({
            "type": "template",
            "template": template_body,
        });
        self.send_payload(contact, body).await
    }

    async fn validate_template(&self, template: &Template) -> bool {
        template.channel == ChannelKind::WhatsApp
            && !template.name.trim().is_empty()
            && template.language.is_some()
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
        let config = match self.configs.whatsapp_config(tenant_id).await {
            Ok(c) => c,
            Err(e) => return WebhookResult::rejected(e.to_string()),
        };
        let Some(signature) = headers.get("x-hub-signature-256") else {
            return WebhookResult::rejected("signature_missing");
        };
        if !verify_whatsapp_signature(&config.app_secret, raw_body, signature) {
            return WebhookResult::rejected("invalid_signature");
        }

        let envelope: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(v) => v,
            Err(e) => return WebhookResult::rejected(format!("malformed payload: {e}")),
        };

        for entry in envelope
            .get("entry")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
        {
            for change in entry
                .get("changes")
                .and_then(serde_json::Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                let Some(value) = change.get("value") else { continue };
                if let Err((kind, e)) = self.apply_value(tenant_id, value).await {
                    tracing::error!(error = %e, "failed to apply whatsapp change");
                    return WebhookResult::rejected_as(kind, e.to_string());
                }
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
    use crate::signature::whatsapp_signature;

    const APP_SECRET: &str = "test-app-secret";

    async fn channel_with_store() -> (WhatsAppChannel, Arc<dyn EngineStore>, Uuid) {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStorage::new());
        let tenant_id = Uuid::new_v4();
        store
            .upsert_channel_config(ChannelConfigRecord {
                tenant_id,
                channel: ChannelKind::WhatsApp,
                settings: serde_json::json!({
                    "access_token": "wa-token",
                    "phone_number_id": "1050001",
                    "app_secret": APP_SECRET,
                }),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let configs =
            ChannelConfigProvider::new(Arc::clone(&store), SecretCipher::new(&[1u8; 32]));
        let channel = WhatsAppChannel::new(
            Arc::clone(&store),
            configs,
            Arc::new(ManualClock::new(Utc::now())),
        )
        .unwrap();
        (channel, store, tenant_id)
    }

    fn signed_headers(tenant_id: Uuid, body: &[u8]) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-tenant-id".to_owned(), tenant_id.to_string());
        headers.insert(
            "x-hub-signature-256".to_owned(),
            whatsapp_signature(APP_SECRET, body),
        );
        headers
    }

    fn status_envelope(wamid: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "statuses": [{ "id": wamid, "status": status }],
                    },
                }],
            }],
        })
    }

    #[tokio::test]
    async fn test_read_status_maps_to_opened() {
        let (channel, store, tenant_id) = channel_with_store().await;
        let message = Message {
            id: Uuid::new_v4(),
            tenant_id,
            conversation_id: Uuid::new_v4(),
            channel: ChannelKind::WhatsApp,
            direction: MessageDirection::Out,
            kind: MessageKind::Text,
            template_name: None,
            payload: serde_json::json!({ "text": "hi" }),
            status: MessageStatus::Sent,
            provider: Some(WHATSAPP_PROVIDER.to_owned()),
            provider_message_id: Some("wamid.1".to_owned()),
            delivered_at: None,
            opened_at: None,
            failed_at: None,
            error_code: None,
            error_reason: None,
            created_at: Utc::now(),
        };
        let id = message.id;
        store.insert_message(message).await.unwrap();

        let body = serde_json::to_vec(&status_envelope("wamid.1", "read")).unwrap();
        let result = channel.handle_webhook(&body, &signed_headers(tenant_id, &body)).await;
        assert!(result.ok, "{:?}", result.reason);

        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Opened);
        // Opened implies delivered.
        assert!(message.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_before_any_write() {
        let (channel, store, tenant_id) = channel_with_store().await;
        let body = serde_json::to_vec(&status_envelope("wamid.2", "delivered")).unwrap();
        let mut headers = signed_headers(tenant_id, &body);
        headers.insert("x-hub-signature-256".to_owned(), "sha256=bad".to_owned());

        let result = channel.handle_webhook(&body, &headers).await;
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("invalid_signature"));
        assert!(!store.event_exists(WHATSAPP_PROVIDER, "wamid.2:delivered").await.unwrap());

        headers.remove("x-hub-signature-256");
        let result = channel.handle_webhook(&body, &headers).await;
        assert_eq!(result.reason.as_deref(), Some("signature_missing"));
    }

    #[tokio::test]
    async fn test_inbound_message_without_plus_prefix() {
        let (channel, store, tenant_id) = channel_with_store().await;
        let contact = Contact {
            id: Uuid::new_v4(),
            tenant_id,
            full_name: None,
            email: None,
            phone: Some("+4915112345678".to_owned()),
            timezone: None,
            tags: Vec::new(),
            opted_out: false,
        };
        let contact_id = contact.id;
        store.upsert_contact(contact).await.unwrap();

        let envelope = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "id": "wamid.3",
                            "from": "4915112345678",
                            "text": { "body": "sounds good" },
                        }],
                    },
                }],
            }],
        });
        let body = serde_json::to_vec(&envelope).unwrap();
        let result = channel.handle_webhook(&body, &signed_headers(tenant_id, &body)).await;
        assert!(result.ok, "{:?}", result.reason);

        assert!(store
            .last_inbound_at(tenant_id, contact_id, ChannelKind::WhatsApp)
            .await
            .unwrap()
            .is_some());
    }
}
