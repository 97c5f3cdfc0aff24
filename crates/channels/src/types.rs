//! Result types shared by all channels.

use serde::{Deserialize, Serialize};

use outflow_core::DeadLetterKind;

/// Outcome of a provider send. Never a panic or an exception: provider HTTP
/// failures and malformed responses are folded into `success = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl SendResult {
    #[must_use]
    pub fn ok(provider_message_id: impl Into<String>) -> Self {
        Self { success: true, provider_message_id: Some(provider_message_id.into()), error: None }
    }

    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, provider_message_id: None, error: Some(error.into()) }
    }
}

/// Outcome of ingesting one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResult {
    pub ok: bool,
    pub reason: Option<String>,
    /// What the delivery was carrying, when the channel got far enough to
    /// tell. `None` on rejection means it never passed verification.
    pub kind: Option<DeadLetterKind>,
}

impl WebhookResult {
    #[must_use]
    pub fn accepted() -> Self {
        Self { ok: true, reason: None, kind: None }
    }

    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { ok: false, reason: Some(reason.into()), kind: None }
    }

    #[must_use]
    pub fn rejected_as(kind: DeadLetterKind, reason: impl Into<String>) -> Self {
        Self { ok: false, reason: Some(reason.into()), kind: Some(kind) }
    }
}
