//! Engine configuration with environment overrides.

use chrono::NaiveTime;

use crate::env_config::env_parse_with_default;

/// Local time-of-day window during which outbound sends are deferred.
///
/// Windows may wrap past midnight (e.g. 22:00–08:00); `contains` handles
/// both orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Whether `time` falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            // Wraps past midnight.
            time >= self.start || time < self.end
        }
    }
}

/// Tunables for the dispatch pipeline.
///
/// Defaults are production-shaped; `from_env` applies `OUTFLOW_*` overrides
/// so operators can adjust without a redeploy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Outbox poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Maximum outbox rows claimed per poll.
    pub batch_size: usize,
    /// Lease duration for claimed rows, in seconds.
    pub lease_secs: i64,
    /// Default maximum attempts for new outbox jobs.
    pub max_attempts: i32,
    /// Base of the outbox retry backoff, in seconds (doubles per attempt).
    pub retry_backoff_base_secs: i64,
    /// Ceiling on the outbox retry backoff, in seconds.
    pub retry_backoff_max_secs: i64,
    /// Quiet window in contact-local time; `None` disables the rule.
    pub quiet_hours: Option<QuietHours>,
    /// Tenant-wide outbound messages per UTC day; `None` disables the cap.
    pub daily_send_cap: Option<u64>,
    /// Local time sends resume the day after the cap is hit.
    pub daily_cap_resume_at: NaiveTime,
    /// Minimum lead time between now and any send, in seconds.
    pub min_lead_secs: i64,
    /// Global ceiling: sends per rolling minute across all tenants.
    pub global_sends_per_minute: usize,
    /// Per-tenant ceiling: sends per rolling minute.
    pub tenant_sends_per_minute: usize,
    /// WhatsApp session window length in hours.
    pub session_window_hours: i64,
    /// Webhook dead-letter retry pass interval in seconds.
    pub webhook_retry_interval_secs: u64,
    /// Dead letters replayed per pass.
    pub webhook_retry_batch: usize,
    /// Retry ceiling after which a dead letter is parked as exhausted.
    pub webhook_max_retries: i32,
    /// Base of the dead-letter backoff, in seconds (doubles per retry).
    pub webhook_backoff_base_secs: i64,
    /// Ceiling on the dead-letter backoff, in seconds.
    pub webhook_backoff_max_secs: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: crate::DEFAULT_POLL_INTERVAL_SECS,
            batch_size: 25,
            lease_secs: crate::DEFAULT_LEASE_SECS,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            retry_backoff_base_secs: 60,
            retry_backoff_max_secs: 3600,
            quiet_hours: Some(QuietHours {
                start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
                end: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            }),
            daily_send_cap: Some(200),
            daily_cap_resume_at: NaiveTime::from_hms_opt(10, 30, 0).unwrap_or_default(),
            min_lead_secs: crate::MIN_LEAD_TIME_SECS,
            global_sends_per_minute: 600,
            tenant_sends_per_minute: 60,
            session_window_hours: crate::WHATSAPP_SESSION_WINDOW_HOURS,
            webhook_retry_interval_secs: 300,
            webhook_retry_batch: 50,
            webhook_max_retries: 25,
            webhook_backoff_base_secs: 300,
            webhook_backoff_max_secs: 21_600,
        }
    }
}

impl DispatchConfig {
    /// Build a config from defaults with `OUTFLOW_*` env overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval_secs: env_parse_with_default(
                "OUTFLOW_POLL_INTERVAL_SECS",
                defaults.poll_interval_secs,
            ),
            batch_size: env_parse_with_default("OUTFLOW_BATCH_SIZE", defaults.batch_size),
            lease_secs: env_parse_with_default("OUTFLOW_LEASE_SECS", defaults.lease_secs),
            max_attempts: env_parse_with_default("OUTFLOW_MAX_ATTEMPTS", defaults.max_attempts),
            retry_backoff_base_secs: env_parse_with_default(
                "OUTFLOW_RETRY_BACKOFF_BASE_SECS",
                defaults.retry_backoff_base_secs,
            ),
            retry_backoff_max_secs: env_parse_with_default(
                "OUTFLOW_RETRY_BACKOFF_MAX_SECS",
                defaults.retry_backoff_max_secs,
            ),
            quiet_hours: defaults.quiet_hours,
            daily_send_cap: match env_parse_with_default::<i64>(
                "OUTFLOW_DAILY_SEND_CAP",
                defaults.daily_send_cap.map_or(-1, |cap| cap as i64),
            ) {
                cap if cap < 0 => defaults.daily_send_cap,
                0 => None,
                cap => Some(cap as u64),
            },
            daily_cap_resume_at: defaults.daily_cap_resume_at,
            min_lead_secs: env_parse_with_default("OUTFLOW_MIN_LEAD_SECS", defaults.min_lead_secs),
            global_sends_per_minute: env_parse_with_default(
                "OUTFLOW_GLOBAL_SENDS_PER_MINUTE",
                defaults.global_sends_per_minute,
            ),
            tenant_sends_per_minute: env_parse_with_default(
                "OUTFLOW_TENANT_SENDS_PER_MINUTE",
                defaults.tenant_sends_per_minute,
            ),
            session_window_hours: env_parse_with_default(
                "OUTFLOW_SESSION_WINDOW_HOURS",
                defaults.session_window_hours,
            ),
            webhook_retry_interval_secs: env_parse_with_default(
                "OUTFLOW_WEBHOOK_RETRY_INTERVAL_SECS",
                defaults.webhook_retry_interval_secs,
            ),
            webhook_retry_batch: env_parse_with_default(
                "OUTFLOW_WEBHOOK_RETRY_BATCH",
                defaults.webhook_retry_batch,
            ),
            webhook_max_retries: env_parse_with_default(
                "OUTFLOW_WEBHOOK_MAX_RETRIES",
                defaults.webhook_max_retries,
            ),
            webhook_backoff_base_secs: env_parse_with_default(
                "OUTFLOW_WEBHOOK_BACKOFF_BASE_SECS",
                defaults.webhook_backoff_base_secs,
            ),
            webhook_backoff_max_secs: env_parse_with_default(
                "OUTFLOW_WEBHOOK_BACKOFF_MAX_SECS",
                defaults.webhook_backoff_max_secs,
            ),
        }
    }
}
