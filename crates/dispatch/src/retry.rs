//! Replays dead-lettered webhook deliveries on a fixed schedule.
//!
//! Every failed webhook keeps its raw body and headers, so a replay goes
//! through the exact same channel entry point as the original delivery,
//! including signature verification. Items are never deleted: success
//! resolves them, repeated failure backs them off, and the retry ceiling
//! parks them as exhausted for operator inspection.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;

use outflow_channels::ChannelRegistry;
use outflow_core::{Clock, DispatchConfig, WebhookDeadLetterItem};
use outflow_storage::EngineStore;

use crate::error::DispatchError;
use crate::processor::retry_backoff;

pub struct WebhookRetryJob {
    store: Arc<dyn EngineStore>,
    registry: ChannelRegistry,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl WebhookRetryJob {
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        registry: ChannelRegistry,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self { store, registry, clock, config }
    }

    /// Replay loop; exits when `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(StdDuration::from_secs(self.config.webhook_retry_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.webhook_retry_interval_secs,
            "webhook retry job started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "webhook retry pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("webhook retry job stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over due dead letters. Returns the number of items replayed.
    ///
    /// # Errors
    /// Only the batch fetch can fail here; per-item outcomes land in the
    /// item's own state.
    pub async fn run_once(&self) -> Result<usize, DispatchError> {
        let now = self.clock.now_utc();
        let due = self.store.due_dead_letters(self.config.webhook_retry_batch, now).await?;
        let count = due.len();

        for item in due {
            if let Err(e) = self.replay(item).await {
                tracing::error!(error = %e, "dead letter replay bookkeeping failed");
            }
        }
        Ok(count)
    }

    async fn replay(&self, item: WebhookDeadLetterItem) -> Result<(), DispatchError> {
        let Some(channel) = self.registry.get(item.channel) else {
            // Channel not deployed here; push the item out rather than
            // burning its retries.
            let next = self.clock.now_utc()
                + chrono::Duration::seconds(self.config.webhook_backoff_max_secs);
            self.store
                .mark_dead_letter_failure(item.id, "no channel registered", next)
                .await?;
            return Ok(());
        };

        let result = channel.handle_webhook(item.payload.as_bytes(), &item.headers).await;
        if result.ok {
            tracing::info!(
                dead_letter_id = %item.id,
                retry_count = item.retry_count,
                "dead letter resolved"
            );
            self.store.mark_dead_letter_success(item.id).await?;
            return Ok(());
        }

        let error = result.reason.unwrap_or_else(|| "webhook rejected".to_owned());
        let failed_retry = item.retry_count + 1;
        if failed_retry >= self.config.webhook_max_retries {
            tracing::warn!(
                dead_letter_id = %item.id,
                retries = failed_retry,
                error = %error,
                "dead letter exhausted"
            );
            self.store.mark_dead_letter_exhausted(item.id, &error).await?;
            return Ok(());
        }

        let delay = retry_backoff(
            self.config.webhook_backoff_base_secs,
            self.config.webhook_backoff_max_secs,
            failed_retry,
        );
        self.store
            .mark_dead_letter_failure(item.id, &error, self.clock.now_utc() + delay)
            .await?;
        Ok(())
    }
}
