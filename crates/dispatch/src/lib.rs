//! Dispatch pipeline for outflow
//!
//! Ties the queue, rules, and channels together: the outbox processor claims
//! due jobs under a lease, the dispatch guard applies send-eligibility rules,
//! the rate limiter enforces global and per-tenant ceilings, the webhook
//! ingestor dead-letters rejected provider callbacks, and the webhook retry
//! job replays them.

mod error;
mod guard;
mod ingest;
mod processor;
mod rate_limiter;
mod retry;
mod service;

pub use error::DispatchError;
pub use guard::{DispatchGuard, GuardInput, GuardVerdict};
pub use ingest::WebhookIngestor;
pub use processor::{retry_backoff, OutboxProcessor};
pub use rate_limiter::MessageSendRateLimiter;
pub use retry::WebhookRetryJob;
pub use service::OutboxService;
