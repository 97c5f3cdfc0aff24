//! Canonical messages and their append-only provider event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ChannelKind, MessageKind};

/// Direction of a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    In,
    Out,
}

impl MessageDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl std::str::FromStr for MessageDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            _ => Err(anyhow::anyhow!("Invalid message direction: {}", s)),
        }
    }
}

/// Lifecycle status of a canonical message.
///
/// Webhook callbacks move a message forward through this lifecycle but never
/// backward: `rank` imposes the monotonic order, so a late `sent` callback
/// cannot revert an already-`Delivered` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Opened,
    Failed,
    Bounced,
}

impl MessageStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
        }
    }

    /// Position in the monotonic lifecycle; transitions may only increase.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match *self {
            Self::Queued => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Opened => 3,
            Self::Failed | Self::Bounced => 4,
        }
    }

    /// Terminal statuses do not regress.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(*self, Self::Delivered | Self::Opened | Self::Failed | Self::Bounced)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    #[must_use]
    pub const fn allows_transition_to(&self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "opened" => Ok(Self::Opened),
            "failed" => Ok(Self::Failed),
            "bounced" => Ok(Self::Bounced),
            _ => Err(anyhow::anyhow!("Invalid message status: {}", s)),
        }
    }
}

/// The canonical record of a sent or received message.
///
/// Created by the outbox processor on successful send (`Out`) or by a channel
/// on inbound webhook (`In`); mutated only by channel webhook handlers as
/// provider status events arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub conversation_id: Uuid,
    pub channel: ChannelKind,
    pub direction: MessageDirection,
    pub kind: MessageKind,
    pub template_name: Option<String>,
    pub payload: serde_json::Value,
    pub status: MessageStatus,
    pub provider: Option<String>,
    /// Unique per `(tenant, provider)` when present.
    pub provider_message_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event type recorded for each applied provider callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEventType {
    Sent,
    Delivered,
    Opened,
    Failed,
    Bounced,
    Inbound,
}

impl MessageEventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Inbound => "inbound",
        }
    }

    /// Canonical message status implied by this event, if any.
    #[must_use]
    pub const fn as_status(&self) -> Option<MessageStatus> {
        match *self {
            Self::Sent => Some(MessageStatus::Sent),
            Self::Delivered => Some(MessageStatus::Delivered),
            Self::Opened => Some(MessageStatus::Opened),
            Self::Failed => Some(MessageStatus::Failed),
            Self::Bounced => Some(MessageStatus::Bounced),
            Self::Inbound => None,
        }
    }
}

impl std::str::FromStr for MessageEventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "opened" => Ok(Self::Opened),
            "failed" => Ok(Self::Failed),
            "bounced" => Ok(Self::Bounced),
            "inbound" => Ok(Self::Inbound),
            _ => Err(anyhow::anyhow!("Invalid message event type: {}", s)),
        }
    }
}

/// Append-only log entry for every provider callback applied to a message.
///
/// `(provider, provider_event_id)` carries a unique constraint — this is the
/// idempotency guard for webhook replays. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub message_id: Option<Uuid>,
    pub provider: String,
    pub provider_event_id: String,
    pub event_type: MessageEventType,
    /// Raw provider envelope for audit/debugging.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MessageEvent {
    #[must_use]
    pub fn new(
        tenant_id: Uuid,
        message_id: Option<Uuid>,
        provider: &str,
        provider_event_id: &str,
        event_type: MessageEventType,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            message_id,
            provider: provider.to_owned(),
            provider_event_id: provider_event_id.to_owned(),
            event_type,
            payload,
            created_at: now,
        }
    }
}

/// Groups messages for a contact on one channel.
///
/// Lazily created on first inbound message when absent. One contact has many
/// conversations (practically one active at a time); one conversation has
/// many messages, ordered by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub channel: ChannelKind,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    #[must_use]
    pub fn new(tenant_id: Uuid, contact_id: Uuid, channel: ChannelKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            contact_id,
            channel,
            created_at: now,
            last_message_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_monotonic() {
        assert!(MessageStatus::Sent.allows_transition_to(MessageStatus::Delivered));
        assert!(MessageStatus::Delivered.allows_transition_to(MessageStatus::Opened));
        assert!(!MessageStatus::Delivered.allows_transition_to(MessageStatus::Sent));
        assert!(!MessageStatus::Opened.allows_transition_to(MessageStatus::Delivered));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(MessageStatus::Delivered.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Sent.is_terminal());
    }

    #[test]
    fn test_event_type_maps_to_status() {
        assert_eq!(MessageEventType::Delivered.as_status(), Some(MessageStatus::Delivered));
        assert_eq!(MessageEventType::Inbound.as_status(), None);
    }
}
