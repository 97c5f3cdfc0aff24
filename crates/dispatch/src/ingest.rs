//! Front door for incoming webhook deliveries.
//!
//! Routes a raw payload to the channel that owns it and, when the channel
//! rejects or fails the delivery, parks it in the dead-letter store so the
//! retry job can replay it later. Accepted deliveries leave no dead letter.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use outflow_channels::{ChannelRegistry, WebhookResult};
use outflow_core::{ChannelKind, Clock, DeadLetterKind, DispatchConfig, WebhookDeadLetterItem};
use outflow_storage::EngineStore;

use crate::error::DispatchError;
use crate::processor::{provider_for, retry_backoff};

pub struct WebhookIngestor {
    store: Arc<dyn EngineStore>,
    registry: ChannelRegistry,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl WebhookIngestor {
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        registry: ChannelRegistry,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self { store, registry, clock, config }
    }

    /// Hand one webhook delivery to its channel.
    ///
    /// Returns the channel's verdict. A not-ok verdict (bad signature,
    /// malformed payload, storage failure mid-apply) additionally records a
    /// pending `WebhookDeadLetterItem` carrying the raw body and headers,
    /// scheduled for its first replay one backoff interval out.
    ///
    /// # Errors
    /// `ChannelUnavailable` when no channel of that kind is registered;
    /// storage errors from the dead-letter insert.
    pub async fn ingest(
        &self,
        channel: ChannelKind,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<WebhookResult, DispatchError> {
        let Some(handler) = self.registry.get(channel) else {
            return Err(DispatchError::ChannelUnavailable(channel));
        };

        let result = handler.handle_webhook(raw_body, headers).await;
        if result.ok {
            return Ok(result);
        }

        let reason =
            result.reason.clone().unwrap_or_else(|| "webhook rejected".to_owned());
        let kind = result.kind.unwrap_or(DeadLetterKind::Verify);
        let tenant_id =
            headers.get("x-tenant-id").and_then(|v| Uuid::parse_str(v).ok());
        let now = self.clock.now_utc();
        let first_attempt = now
            + retry_backoff(
                self.config.webhook_backoff_base_secs,
                self.config.webhook_backoff_max_secs,
                1,
            );
        let item = WebhookDeadLetterItem::new(
            tenant_id,
            channel,
            provider_for(channel),
            kind,
            String::from_utf8_lossy(raw_body).into_owned(),
            headers.clone(),
            &reason,
            now,
            first_attempt,
        );
        let id = self.store.push_dead_letter(item).await?;
        tracing::warn!(
            channel = channel.as_str(),
            dead_letter_id = %id,
            kind = kind.as_str(),
            reason = %reason,
            "webhook rejected, dead-lettered"
        );
        Ok(result)
    }
}
