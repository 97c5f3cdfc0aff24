//! The outbox processor: claims due jobs and drives them to a terminal or
//! requeued state.
//!
//! Multiple instances may run against the same database; safety comes from
//! the atomic lease claim in `OutboxStore::claim_due`, not from any
//! in-process coordination. A crashed worker's jobs are reclaimed once
//! their lease expires.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use outflow_channels::{
    ChannelRegistry, MessageChannel, EMAIL_PROVIDER, SMS_PROVIDER, WHATSAPP_PROVIDER,
};
use outflow_core::{
    ChannelKind, Clock, Contact, Conversation, DispatchConfig, Message, MessageDirection,
    MessageKind, MessageStatus, OutboxMessage, Template,
};
use outflow_storage::EngineStore;

use crate::error::DispatchError;
use crate::guard::{DispatchGuard, GuardInput, GuardVerdict};
use crate::rate_limiter::MessageSendRateLimiter;

/// Exponential backoff for transient send failures: `base * 2^(attempt-1)`,
/// capped. `attempt` is the attempt that just failed, 1-based.
#[must_use]
pub fn retry_backoff(base_secs: i64, max_secs: i64, attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 30) as u32;
    let secs = base_secs.saturating_mul(1_i64 << exponent).min(max_secs);
    Duration::seconds(secs)
}

pub(crate) fn provider_for(channel: ChannelKind) -> &'static str {
    match channel {
        ChannelKind::Email => EMAIL_PROVIDER,
        ChannelKind::Sms => SMS_PROVIDER,
        ChannelKind::WhatsApp => WHATSAPP_PROVIDER,
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn EngineStore>,
    registry: ChannelRegistry,
    guard: DispatchGuard,
    limiter: Arc<MessageSendRateLimiter>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl OutboxProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        registry: ChannelRegistry,
        limiter: Arc<MessageSendRateLimiter>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        let guard = DispatchGuard::new(config.clone());
        Self { store, registry, guard, limiter, clock, config }
    }

    /// Poll loop; exits when `shutdown` flips to `true`.
    ///
    /// Jobs in flight when shutdown lands stay `Sending` until their lease
    /// expires and another worker reclaims them.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(StdDuration::from_secs(self.config.poll_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_secs = self.config.poll_interval_secs,
            batch_size = self.config.batch_size,
            "outbox processor started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "outbox poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("outbox processor stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One poll: claim a batch and process every job. Returns the number of
    /// jobs claimed.
    ///
    /// # Errors
    /// Only the claim itself can fail here; per-job failures are folded into
    /// outbox state and never abort the batch.
    pub async fn run_once(&self) -> Result<usize, DispatchError> {
        let now = self.clock.now_utc();
        let claimed = self
            .store
            .claim_due(self.config.batch_size, self.config.lease_secs, now)
            .await?;
        let count = claimed.len();

        for job in claimed {
            let job_id = job.id;
            if let Err(e) = self.process_job(job).await {
                // Infrastructure failure mid-job: requeue with backoff so the
                // loop keeps draining. The lease is the backstop if even this
                // write fails.
                tracing::error!(job_id = %job_id, error = %e, "job processing failed");
                let retry_at = self.clock.now_utc() + Duration::seconds(self.config.lease_secs);
                if let Err(e) = self
                    .store
                    .record_failure(job_id, &e.to_string(), Some(retry_at))
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %e, "failed to record job failure");
                }
            }
        }
        Ok(count)
    }

    async fn process_job(&self, job: OutboxMessage) -> Result<(), DispatchError> {
        let now = self.clock.now_utc();

        let Some(contact) = self.store.get_contact(job.contact_id).await? else {
            tracing::warn!(job_id = %job.id, contact_id = %job.contact_id, "contact missing");
            self.store.record_failure(job.id, "contact not found", None).await?;
            return Ok(());
        };

        let conversation = match job.conversation_id {
            Some(id) => self.store.get_conversation(id).await?,
            None => {
                self.store
                    .find_latest_conversation(job.tenant_id, job.contact_id, job.channel)
                    .await?
            },
        };

        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map_or(now, |m| m.and_utc());
        let sent_today = self.store.count_outbound_since(job.tenant_id, midnight).await?;
        let last_inbound_at = self
            .store
            .last_inbound_at(job.tenant_id, job.contact_id, job.channel)
            .await?;

        let input = GuardInput {
            job: job.clone(),
            contact: contact.clone(),
            conversation: conversation.clone(),
            now,
            sent_today,
            last_inbound_at,
        };
        match self.guard.evaluate(&input) {
            GuardVerdict::Reschedule(at) => {
                tracing::info!(job_id = %job.id, reschedule_at = %at, "guard deferred send");
                self.store.reschedule(job.id, at).await?;
                return Ok(());
            },
            GuardVerdict::Fail(code) => {
                tracing::info!(job_id = %job.id, code = code.as_str(), "guard vetoed send");
                self.store.fail_permanent(job.id, code).await?;
                return Ok(());
            },
            GuardVerdict::Send => {},
        }

        if !self.limiter.try_acquire(job.tenant_id, now).await? {
            // Denied sends go straight back to the queue for the next poll,
            // without consuming an attempt.
            self.store.release(job.id).await?;
            return Ok(());
        }

        let Some(channel) = self.registry.get(job.channel) else {
            tracing::warn!(job_id = %job.id, channel = job.channel.as_str(), "channel unavailable");
            self.transient_failure(&job, "no channel registered").await?;
            return Ok(());
        };

        self.send_job(&job, &contact, conversation, channel).await
    }

    async fn send_job(
        &self,
        job: &OutboxMessage,
        contact: &Contact,
        conversation: Option<Conversation>,
        channel: Arc<dyn MessageChannel>,
    ) -> Result<(), DispatchError> {
        let (result, template_name) = match job.kind {
            MessageKind::Text => {
                let text = job
                    .payload
                    .get("text")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                (channel.send_text(contact, text, job.meta.as_ref()).await, None)
            },
            MessageKind::Template => {
                let Some(template) = self.load_template(job).await? else {
                    self.store
                        .fail_permanent(job.id, outflow_core::FailureCode::InvalidTemplate)
                        .await?;
                    return Ok(());
                };
                if !template.variables_satisfied_by(&job.payload)
                    || !channel.validate_template(&template).await
                {
                    self.store
                        .fail_permanent(job.id, outflow_core::FailureCode::InvalidTemplate)
                        .await?;
                    return Ok(());
                }
                let result = channel
                    .send_template(contact, &template, &job.payload, job.meta.as_ref())
                    .await;
                (result, Some(template.name))
            },
        };

        if result.success {
            self.record_sent(job, conversation, template_name, result.provider_message_id)
                .await?;
            return Ok(());
        }

        let error = result.error.unwrap_or_else(|| "send failed".to_owned());
        tracing::warn!(job_id = %job.id, error = %error, "send failed");
        self.transient_failure(job, &error).await?;
        Ok(())
    }

    async fn record_sent(
        &self,
        job: &OutboxMessage,
        conversation: Option<Conversation>,
        template_name: Option<String>,
        provider_message_id: Option<String>,
    ) -> Result<(), DispatchError> {
        let now = self.clock.now_utc();
        let conversation = match conversation {
            Some(c) => c,
            None => {
                let c = Conversation::new(job.tenant_id, job.contact_id, job.channel, now);
                self.store.create_conversation(c.clone()).await?;
                c
            },
        };

        let message = Message {
            id: Uuid::new_v4(),
            tenant_id: job.tenant_id,
            conversation_id: conversation.id,
            channel: job.channel,
            direction: MessageDirection::Out,
            kind: job.kind,
            template_name,
            payload: job.payload.clone(),
            status: MessageStatus::Sent,
            provider: Some(provider_for(job.channel).to_owned()),
            provider_message_id,
            delivered_at: None,
            opened_at: None,
            failed_at: None,
            error_code: None,
            error_reason: None,
            created_at: now,
        };
        self.store.insert_message(message).await?;
        self.store.touch_conversation(conversation.id, now).await?;
        self.store.mark_sent(job.id).await?;
        tracing::info!(job_id = %job.id, channel = job.channel.as_str(), "sent");
        Ok(())
    }

    async fn load_template(&self, job: &OutboxMessage) -> Result<Option<Template>, DispatchError> {
        let Some(template_id) = job.template_id else {
            return Ok(None);
        };
        Ok(self.store.get_template(job.tenant_id, template_id).await?)
    }

    /// Consume an attempt: requeue with backoff, or fail terminally once the
    /// attempt budget is spent.
    async fn transient_failure(
        &self,
        job: &OutboxMessage,
        error: &str,
    ) -> Result<(), DispatchError> {
        let failed_attempt = job.attempts + 1;
        let retry_at = if failed_attempt < job.max_attempts {
            let delay = retry_backoff(
                self.config.retry_backoff_base_secs,
                self.config.retry_backoff_max_secs,
                failed_attempt,
            );
            Some(self.clock.now_utc() + delay)
        } else {
            None
        };
        self.store.record_failure(job.id, error, retry_at).await?;
        Ok(())
    }
}
