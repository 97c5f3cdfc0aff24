//! SMS channel (Twilio Messages API).
//!
//! Outbound sends are form-encoded `POST`s to
//! `/2010-04-01/Accounts/{sid}/Messages.json` with basic auth. Callbacks
//! arrive form-encoded and signed with `X-Twilio-Signature`: base64
//! HMAC-SHA1 over the full request URL plus the sorted form parameters. The
//! HTTP layer forwards the public callback URL in `x-request-url` so the
//! signature can be recomputed here.

use std::collections::HashMap;
use std::sync::Arc;

use outflow_core::{ChannelKind, Clock, Contact, DeadLetterKind, MessageEventType, Template};
use outflow_storage::EngineStore;
use uuid::Uuid;

use crate::config::ChannelConfigProvider;
use crate::error::ChannelError;
use crate::http::RetryClient;
use crate::phone::normalize_e164;
use crate::signature::verify_twilio_signature;
use crate::traits::MessageChannel;
use crate::types::{SendResult, WebhookResult};
use crate::webhook::{
    apply_inbound_message, apply_status_event, InboundAddress, InboundMessage, StatusEvent,
};

pub const SMS_PROVIDER: &str = "twilio";

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

pub struct SmsChannel {
    store: Arc<dyn EngineStore>,
    configs: ChannelConfigProvider,
    client: RetryClient,
    clock: Arc<dyn Clock>,
    base_url: String,
}

impl SmsChannel {
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

    async fn deliver(&self, contact: &Contact, body: &str) -> Result<String, ChannelError> {
        let to = contact
            .phone
            .as_deref()
            .and_then(normalize_e164)
            .ok_or_else(|| {
                ChannelError::InvalidAddress("contact has no usable phone number".to_owned())
            })?;
        let config = self.configs.twilio_config(contact.tenant_id).await?;

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, config.account_sid
        );
        let form = [
            ("To".to_owned(), to),
            ("From".to_owned(), config.from_number.clone()),
            ("Body".to_owned(), body.to_owned()),
        ];
        let response = self
            .client
            .execute(move |client| {
                client
                    .post(&url)
                    .basic_auth(&config.account_sid, Some(&config.auth_token))
                    .form(&form)
            })
            .await?;

        let parsed: serde_json::Value = response.json().await?;
        parsed
            .get("sid")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ChannelError::InvalidResponse("missing sid in response".to_owned()))
    }
}

fn event_type_for(status: &str) -> Option<MessageEventType> {
    match status {
        "queued" | "accepted" | "sending" => None,
        "sent" => Some(MessageEventType::Sent),
        "delivered" => Some(MessageEventType::Delivered),
        "read" => Some(MessageEventType::Opened),
        "failed" => Some(MessageEventType::Failed),
        "undelivered" => Some(MessageEventType::Bounced),
        _ => None,
    }
}

fn parse_form(raw_body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw_body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

#[async_trait::async_trait]
impl MessageChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send_text(
        &self,
        contact: &Contact,
        text: &str,
        _meta: Option<&serde_json::Value>,
    ) -> SendResult {
        match self.deliver(contact, text).await {
            Ok(sid) => SendResult::ok(sid),
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
        template.channel == ChannelKind::Sms && !template.body.trim().is_empty()
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
        let config = match self.configs.twilio_config(tenant_id).await {
            Ok(c) => c,
            Err(e) => return WebhookResult::rejected(e.to_string()),
        };

        let form = parse_form(raw_body);
        let Some(signature) = headers.get("x-twilio-signature") else {
            return WebhookResult::rejected("signature_missing");
        };
        let Some(request_url) = headers.get("x-request-url") else {
            return WebhookResult::rejected("missing request url");
        };
        if !verify_twilio_signature(&config.auth_token, request_url, &form, signature) {
            return WebhookResult::rejected("invalid_signature");
        }

        let field = |name: &str| -> Option<&str> {
            form.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
        };
        let Some(sid) = field("MessageSid").or_else(|| field("SmsSid")).map(str::to_owned)
        else {
            return WebhookResult::rejected("missing MessageSid");
        };
        let payload: serde_json::Value = form
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>()
            .into();
        let now = self.clock.now_utc();

        // A status callback carries MessageStatus; an inbound message
        // carries Body/From instead.
        if let Some(status) = field("MessageStatus") {
            let Some(event_type) = event_type_for(status) else {
                tracing::debug!(status, "ignoring sms status");
                return WebhookResult::accepted();
            };
            let error_code = field("ErrorCode").map(str::to_owned);
            let result = apply_status_event(
                &self.store,
                StatusEvent {
                    tenant_id,
                    provider: SMS_PROVIDER.to_owned(),
                    provider_event_id: format!("{sid}:{status}"),
                    provider_message_id: sid,
                    event_type,
                    occurred_at: None,
                    error_code,
                    error_reason: None,
                    payload,
                },
                now,
            )
            .await;
            return match result {
                Ok(r) => r,
                Err(e) => WebhookResult::rejected_as(DeadLetterKind::Status, e.to_string()),
            };
        }

        let Some(from) = field("From").map(str::to_owned) else {
            return WebhookResult::rejected("missing From");
        };
        let text = field("Body").map(str::to_owned);
        let result = apply_inbound_message(
            &self.store,
            InboundMessage {
                tenant_id,
                channel: ChannelKind::Sms,
                provider: SMS_PROVIDER.to_owned(),
                provider_event_id: format!("{sid}:in"),
                provider_message_id: sid,
                from: InboundAddress::Phone(from),
                text,
                payload,
            },
            now,
        )
        .await;
        match result {
            Ok(r) => r,
            Err(e) => WebhookResult::rejected_as(DeadLetterKind::Inbound, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outflow_core::ManualClock;
    use outflow_storage::{ChannelConfigRecord, MemoryStorage};
    use crate::secrets::SecretCipher;
    use crate::signature::twilio_signature;

    const AUTH_TOKEN: &str = "test-auth-token";
    const CALLBACK_URL: &str = "https://hooks.acme.test/webhooks/sms";

    async fn channel_with_store() -> (SmsChannel, Arc<dyn EngineStore>, Uuid) {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStorage::new());
        let tenant_id = Uuid::new_v4();
        store
            .upsert_channel_config(ChannelConfigRecord {
                tenant_id,
                channel: ChannelKind::Sms,
                settings: serde_json::json!({
                    "account_sid": "AC_test",
                    "auth_token": AUTH_TOKEN,
                    "from_number": "+15550009999",
                }),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let configs =
            ChannelConfigProvider::new(Arc::clone(&store), SecretCipher::new(&[1u8; 32]));
        let channel =
            SmsChannel::new(Arc::clone(&store), configs, Arc::new(ManualClock::new(Utc::now())))
                .unwrap();
        (channel, store, tenant_id)
    }

    fn signed_form(tenant_id: Uuid, pairs: &[(&str, &str)]) -> (Vec<u8>, HashMap<String, String>) {
        let owned: Vec<(String, String)> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().copied())
            .finish()
            .into_bytes();
        let mut headers = HashMap::new();
        headers.insert("x-tenant-id".to_owned(), tenant_id.to_string());
        headers.insert("x-request-url".to_owned(), CALLBACK_URL.to_owned());
        headers.insert(
            "x-twilio-signature".to_owned(),
            twilio_signature(AUTH_TOKEN, CALLBACK_URL, &owned),
        );
        (body, headers)
    }

    #[tokio::test]
    async fn test_inbound_sms_from_known_contact() {
        let (channel, store, tenant_id) = channel_with_store().await;
        let contact = Contact {
            id: Uuid::new_v4(),
            tenant_id,
            full_name: None,
            email: None,
            phone: Some("+15550001234".to_owned()),
            timezone: None,
            tags: Vec::new(),
            opted_out: false,
        };
        let contact_id = contact.id;
        store.upsert_contact(contact).await.unwrap();

        let (body, headers) = signed_form(
            tenant_id,
            &[("SmsSid", "SM100"), ("From", "+15550001234"), ("Body", "yes please")],
        );
        let result = channel.handle_webhook(&body, &headers).await;
        assert!(result.ok, "{:?}", result.reason);

        assert!(store.event_exists(SMS_PROVIDER, "SM100:in").await.unwrap());
        assert!(store
            .last_inbound_at(tenant_id, contact_id, ChannelKind::Sms)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delivered_callback_updates_message() {
        use outflow_core::{Message, MessageDirection, MessageKind, MessageStatus};

        let (channel, store, tenant_id) = channel_with_store().await;
        let message = Message {
            id: Uuid::new_v4(),
            tenant_id,
            conversation_id: Uuid::new_v4(),
            channel: ChannelKind::Sms,
            direction: MessageDirection::Out,
            kind: MessageKind::Text,
            template_name: None,
            payload: serde_json::json!({ "text": "hi" }),
            status: MessageStatus::Sent,
            provider: Some(SMS_PROVIDER.to_owned()),
            provider_message_id: Some("SM200".to_owned()),
            delivered_at: None,
            opened_at: None,
            failed_at: None,
            error_code: None,
            error_reason: None,
            created_at: Utc::now(),
        };
        let id = message.id;
        store.insert_message(message).await.unwrap();

        let (body, headers) = signed_form(
            tenant_id,
            &[("MessageSid", "SM200"), ("MessageStatus", "delivered")],
        );
        let result = channel.handle_webhook(&body, &headers).await;
        assert!(result.ok, "{:?}", result.reason);

        let message = store.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
        assert!(store.event_exists(SMS_PROVIDER, "SM200:delivered").await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_form_is_rejected() {
        let (channel, _store, tenant_id) = channel_with_store().await;
        let (_, headers) = signed_form(
            tenant_id,
            &[("SmsSid", "SM101"), ("MessageStatus", "delivered")],
        );
        let tampered = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs([("SmsSid", "SM999"), ("MessageStatus", "delivered")])
            .finish()
            .into_bytes();

        let result = channel.handle_webhook(&tampered, &headers).await;
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("invalid_signature"));

        let mut missing = headers;
        missing.remove("x-twilio-signature");
        let result = channel.handle_webhook(&tampered, &missing).await;
        assert_eq!(result.reason.as_deref(), Some("signature_missing"));
    }

    #[tokio::test]
    async fn test_intermediate_status_is_acknowledged_without_event() {
        let (channel, store, tenant_id) = channel_with_store().await;
        let (body, headers) =
            signed_form(tenant_id, &[("SmsSid", "SM102"), ("MessageStatus", "queued")]);

        let result = channel.handle_webhook(&body, &headers).await;
        assert!(result.ok);
        assert!(!store.event_exists(SMS_PROVIDER, "SM102:queued").await.unwrap());
    }
}
