//! Outbox jobs: durable send intents processed asynchronously.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ChannelKind;

/// Processing status of an outbox job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Waiting to be claimed (possibly scheduled for later).
    Queued,
    /// Claimed by a worker under a live lease.
    Sending,
    /// Successfully handed to the provider.
    Sent,
    /// Terminally failed (attempts exhausted or permanent business veto).
    Failed,
}

impl OutboxStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(anyhow::anyhow!("Invalid outbox status: {}", s)),
        }
    }
}

/// Content kind of a message: free-form text or a pre-approved template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Template,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::Text => "text",
            Self::Template => "template",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "template" => Ok(Self::Template),
            _ => Err(anyhow::anyhow!("Invalid message kind: {}", s)),
        }
    }
}

/// Permanent business reason a send was refused.
///
/// These are not transient: the job is terminally failed without consuming a
/// retry attempt, and the code is surfaced so the UI can explain *why* the
/// message will not go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Contact carries an opt-out marker or the linked prospect opted out.
    OptOut,
    /// Free-form WhatsApp text outside the 24h session window.
    WhatsAppSessionExpired,
    /// Template failed the channel's schema validation.
    InvalidTemplate,
}

impl FailureCode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match *self {
            Self::OptOut => "opt_out",
            Self::WhatsAppSessionExpired => "whatsapp_session_expired",
            Self::InvalidTemplate => "invalid_template",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending or processed send intent.
///
/// Created by callers (campaign runner, automations, AI follow-up), mutated
/// only by the outbox processor, never deleted — the table doubles as an
/// audit trail. Invariants: `attempts <= max_attempts`; a `Sending` row must
/// hold a non-expired lease or it is eligible for re-claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub channel: ChannelKind,
    pub kind: MessageKind,
    pub template_id: Option<Uuid>,
    /// Text body or template variables, depending on `kind`.
    pub payload: serde_json::Value,
    pub meta: Option<serde_json::Value>,
    /// `None` means send as soon as possible.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: OutboxStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Lease expiry while a worker holds this row.
    pub locked_until: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Whether this job is due at `now` (unscheduled jobs are always due).
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }

    /// Whether the lease (if any) has expired at `now`.
    #[must_use]
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_none_or(|until| until < now)
    }
}

/// Caller-facing input for enqueueing a new send intent.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub tenant_id: Uuid,
    pub contact_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub channel: ChannelKind,
    pub kind: MessageKind,
    pub template_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub meta: Option<serde_json::Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_attempts: i32,
}

impl NewOutboxMessage {
    /// A free-form text send, unscheduled (ASAP).
    #[must_use]
    pub fn text(tenant_id: Uuid, contact_id: Uuid, channel: ChannelKind, body: &str) -> Self {
        Self {
            tenant_id,
            contact_id,
            conversation_id: None,
            channel,
            kind: MessageKind::Text,
            template_id: None,
            payload: serde_json::json!({ "text": body }),
            meta: None,
            scheduled_at: None,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// A template send with the given variables, unscheduled (ASAP).
    #[must_use]
    pub fn template(
        tenant_id: Uuid,
        contact_id: Uuid,
        channel: ChannelKind,
        template_id: Uuid,
        variables: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            contact_id,
            conversation_id: None,
            channel,
            kind: MessageKind::Template,
            template_id: Some(template_id),
            payload: variables,
            meta: None,
            scheduled_at: None,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Materialize into a full outbox row with a fresh id.
    #[must_use]
    pub fn into_message(self, now: DateTime<Utc>) -> OutboxMessage {
        OutboxMessage {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            contact_id: self.contact_id,
            conversation_id: self.conversation_id,
            channel: self.channel,
            kind: self.kind,
            template_id: self.template_id,
            payload: self.payload,
            meta: self.meta,
            scheduled_at: self.scheduled_at,
            attempts: 0,
            max_attempts: self.max_attempts,
            status: OutboxStatus::Queued,
            last_error: None,
            created_at: now,
            locked_until: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_unscheduled_job_is_due() {
        let now = Utc::now();
        let job = NewOutboxMessage::text(Uuid::new_v4(), Uuid::new_v4(), ChannelKind::Sms, "hi")
            .into_message(now);
        assert!(job.is_due(now));
    }

    #[test]
    fn test_scheduled_job_due_only_after_schedule() {
        let now = Utc::now();
        let mut spec =
            NewOutboxMessage::text(Uuid::new_v4(), Uuid::new_v4(), ChannelKind::Email, "hi");
        spec.scheduled_at = Some(now + Duration::hours(1));
        let job = spec.into_message(now);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + Duration::hours(2)));
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let mut job =
            NewOutboxMessage::text(Uuid::new_v4(), Uuid::new_v4(), ChannelKind::Sms, "hi")
                .into_message(now);
        assert!(job.lease_expired(now));
        job.locked_until = Some(now + Duration::minutes(2));
        assert!(!job.lease_expired(now));
        assert!(job.lease_expired(now + Duration::minutes(3)));
    }

    #[test]
    fn test_failure_code_strings() {
        assert_eq!(FailureCode::OptOut.as_str(), "opt_out");
        assert_eq!(FailureCode::WhatsAppSessionExpired.as_str(), "whatsapp_session_expired");
    }
}
