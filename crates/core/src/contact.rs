//! Contacts and their opt-out semantics.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ChannelKind;

/// A reachable person belonging to a tenant.
///
/// `tags` is the parsed form of the tag JSON list maintained by campaigns and
/// imports; opt-out markers and timezone overrides live there. `opted_out`
/// mirrors the linked prospect record's flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// IANA timezone name, e.g. `Europe/Berlin`. `None` falls back to UTC.
    pub timezone: Option<String>,
    pub tags: Vec<String>,
    pub opted_out: bool,
}

impl Contact {
    /// Whether the contact has opted out of the given channel.
    ///
    /// A generic `stop` tag, a channel-specific `optout_<channel>` or
    /// `stop_<channel>` tag, or the prospect-level flag all count.
    #[must_use]
    pub fn is_opted_out(&self, channel: ChannelKind) -> bool {
        if self.opted_out {
            return true;
        }
        let optout_marker = format!("optout_{}", channel.as_str());
        let stop_marker = format!("stop_{}", channel.as_str());
        self.tags.iter().any(|tag| {
            let tag = tag.trim().to_ascii_lowercase();
            tag == "stop" || tag == optout_marker || tag == stop_marker
        })
    }
}
