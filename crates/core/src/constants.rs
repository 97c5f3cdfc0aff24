//! Shared constants for outflow.
//!
//! Centralizes magic numbers that would otherwise be duplicated across crates.

/// PostgreSQL connection pool: maximum connections.
pub const PG_POOL_MAX_CONNECTIONS: u32 = 20;

/// PostgreSQL connection pool: acquire timeout in seconds.
pub const PG_POOL_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Default lease duration for a claimed outbox row, in seconds.
///
/// Sized to exceed the slowest expected provider call plus margin; a crashed
/// worker's rows become reclaimable once the lease expires.
pub const DEFAULT_LEASE_SECS: i64 = 120;

/// Default outbox poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default maximum send attempts before an outbox job is terminally failed.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Minimum lead time between "now" and any computed send time, in seconds.
/// Guards against racing a just-created job.
pub const MIN_LEAD_TIME_SECS: i64 = 300;

/// Rolling window length for the send rate limiter, in seconds.
pub const RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// WhatsApp free-form replies are only permitted within this many hours of
/// the contact's last inbound message.
pub const WHATSAPP_SESSION_WINDOW_HOURS: i64 = 24;

/// Provider HTTP request timeout in seconds.
pub const PROVIDER_HTTP_TIMEOUT_SECS: u64 = 30;
