//! Webhook dead letters: failed deliveries awaiting replay.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ChannelKind;

/// What the failed webhook delivery was carrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterKind {
    /// Provider status callback for an outbound message.
    Status,
    /// Inbound message from a contact.
    Inbound,
    /// Rejected before parsing (signature/header verification).
    Verify,
}

impl DeadLetterKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Status => "status",
            Self::Inbound => "inbound",
            Self::Verify => "verify",
        }
    }
}

impl std::str::FromStr for DeadLetterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(Self::Status),
            "inbound" => Ok(Self::Inbound),
            "verify" => Ok(Self::Verify),
            _ => Err(anyhow::anyhow!("Invalid dead letter kind: {}", s)),
        }
    }
}

/// Retry lifecycle of a dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterStatus {
    /// Scheduled for replay.
    Pending,
    /// Replay succeeded.
    Resolved,
    /// Retry ceiling hit; kept for manual inspection, no longer scheduled.
    Exhausted,
}

impl DeadLetterStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Exhausted => "exhausted",
        }
    }
}

impl std::str::FromStr for DeadLetterStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(anyhow::anyhow!("Invalid dead letter status: {}", s)),
        }
    }
}

/// A failed webhook delivery retained for retry and operator inspection.
///
/// Items are never silently dropped: success resolves them, repeated failure
/// backs them off, and exhausting the retry ceiling parks them as
/// `Exhausted` while keeping the full payload and headers for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeadLetterItem {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub channel: ChannelKind,
    pub provider: String,
    pub kind: DeadLetterKind,
    /// Raw request body exactly as received, required for re-verification.
    pub payload: String,
    pub headers: HashMap<String, String>,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: DeadLetterStatus,
    pub created_at: DateTime<Utc>,
}

impl WebhookDeadLetterItem {
    #[must_use]
    pub fn new(
        tenant_id: Option<Uuid>,
        channel: ChannelKind,
        provider: &str,
        kind: DeadLetterKind,
        payload: String,
        headers: HashMap<String, String>,
        error: &str,
        now: DateTime<Utc>,
        first_attempt_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            channel,
            provider: provider.to_owned(),
            kind,
            payload,
            headers,
            last_error: Some(error.to_owned()),
            retry_count: 0,
            next_attempt_at: Some(first_attempt_at),
            status: DeadLetterStatus::Pending,
            created_at: now,
        }
    }
}
