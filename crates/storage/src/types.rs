//! Storage types shared across modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use outflow_core::ChannelKind;

/// Outcome of recording a message event against the unique
/// `(provider, provider_event_id)` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventInsert {
    /// First time this event was seen.
    Inserted,
    /// Event id already recorded — webhook replay, skip processing.
    Duplicate,
}

/// Tenant-scoped provider credentials row.
///
/// `settings` holds the provider config as JSON; secret-valued fields are
/// stored encrypted (base64 of nonce plus ciphertext) and decrypted by the
/// channel configuration provider, never by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfigRecord {
    pub tenant_id: Uuid,
    pub channel: ChannelKind,
    pub settings: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Read-only queue aggregates surfaced to operational dashboards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueDepths {
    /// Outbox rows waiting or scheduled.
    pub outbox_queued: u64,
    /// Dead letters pending replay.
    pub dead_letters_pending: u64,
}
