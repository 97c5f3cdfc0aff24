//! The channel abstraction.

use std::collections::HashMap;

use async_trait::async_trait;

use outflow_core::{ChannelKind, Contact, Template};

use crate::types::{SendResult, WebhookResult};

/// One delivery channel: outbound sends plus webhook ingestion.
///
/// Implementations are selected dynamically via the `ChannelRegistry`
/// (`channel -> implementation` map), shared across workers, and must be safe
/// for concurrent use. Send methods are non-throwing: every failure mode is
/// folded into the returned `SendResult`.
///
/// Webhook headers are expected with lowercased names; the HTTP layer also
/// injects `x-tenant-id` (resolved tenant) and, for form-signed providers,
/// `x-request-url` (the public callback URL the provider signed).
#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Send a free-form text message to the contact.
    async fn send_text(
        &self,
        contact: &Contact,
        text: &str,
        meta: Option<&serde_json::Value>,
    ) -> SendResult;

    /// Send a pre-approved template with the given variables.
    async fn send_template(
        &self,
        contact: &Contact,
        template: &Template,
        variables: &serde_json::Value,
        meta: Option<&serde_json::Value>,
    ) -> SendResult;

    /// Schema sanity check before a template is used on this channel.
    async fn validate_template(&self, template: &Template) -> bool;

    /// Verify, parse, and idempotently apply one webhook delivery.
    ///
    /// Must not mutate any state before signature verification passes.
    /// Duplicate deliveries (already-recorded event ids) are a successful
    /// no-op; unrecognized event types are logged and acknowledged so the
    /// provider stops retrying them.
    async fn handle_webhook(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> WebhookResult;
}
