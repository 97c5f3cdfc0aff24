//! Store traits, one per entity family.
//!
//! All methods are async and return `Result<_, StorageError>`. Both backends
//! (`PgStorage`, `MemoryStorage`) implement every trait; the umbrella
//! `EngineStore` supertrait is what the dispatch pipeline takes.

mod contact;
mod dead_letter;
mod message;
mod outbox;
mod rate_limit;
mod tenant_config;

pub use contact::{ContactStore, ConversationStore};
pub use dead_letter::DeadLetterStore;
pub use message::{MessageEventStore, MessageStore};
pub use outbox::OutboxStore;
pub use rate_limit::RateLimitStore;
pub use tenant_config::{ChannelConfigStore, TemplateStore};

/// Everything the dispatch pipeline needs from persistence.
pub trait EngineStore:
    OutboxStore
    + MessageStore
    + MessageEventStore
    + ContactStore
    + ConversationStore
    + RateLimitStore
    + DeadLetterStore
    + ChannelConfigStore
    + TemplateStore
{
}

impl<T> EngineStore for T where
    T: OutboxStore
        + MessageStore
        + MessageEventStore
        + ContactStore
        + ConversationStore
        + RateLimitStore
        + DeadLetterStore
        + ChannelConfigStore
        + TemplateStore
{
}
