//! Channel lookup by kind.

use std::collections::HashMap;
use std::sync::Arc;

use outflow_core::ChannelKind;

use crate::traits::MessageChannel;

/// Maps each channel kind to its implementation.
///
/// Built once at startup and shared; channels absent from the map are
/// treated as disabled for the whole deployment.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelKind, Arc<dyn MessageChannel>>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn register(&mut self, channel: Arc<dyn MessageChannel>) {
        self.channels.insert(channel.kind(), channel);
    }

    #[must_use]
    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn MessageChannel>> {
        self.channels.get(&kind).cloned()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<ChannelKind> = self.channels.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry").field("kinds", &self.kinds()).finish()
    }
}
