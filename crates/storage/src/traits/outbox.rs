use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use outflow_core::{FailureCode, OutboxMessage};

use crate::error::StorageError;

/// Outbox queue operations.
///
/// Concurrency contract: `claim_due` is the only entry point that moves rows
/// to `Sending`, and it must be atomic per row — two workers racing for the
/// same row get exactly one winner. Rows are never deleted; the table is an
/// audit trail.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new send intent. Returns the job id.
    async fn enqueue(&self, job: OutboxMessage) -> Result<Uuid, StorageError>;

    /// Atomically claim a bounded batch of due jobs.
    ///
    /// Eligible rows: `Queued` with no live lease and a due (or absent)
    /// schedule, plus `Sending` rows whose lease expired (crash recovery).
    /// Claimed rows become `Sending` with `locked_until = now + lease_secs`.
    async fn claim_due(
        &self,
        limit: usize,
        lease_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, StorageError>;

    /// Mark a job successfully handed to the provider; clears the lease.
    async fn mark_sent(&self, id: Uuid) -> Result<(), StorageError>;

    /// Push a job back to `Queued` at a later time without consuming an
    /// attempt (guard reschedule). Clears the lease.
    async fn reschedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Return a job to `Queued` unchanged (rate-limit skip); next poll will
    /// pick it up again. Clears the lease.
    async fn release(&self, id: Uuid) -> Result<(), StorageError>;

    /// Record a transient send failure: increments `attempts`, and either
    /// requeues at `retry_at` or (when `retry_at` is `None`) terminally
    /// fails the job. Clears the lease.
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// Terminally fail a job for a permanent business reason without
    /// consuming an attempt. Clears the lease.
    async fn fail_permanent(&self, id: Uuid, code: FailureCode) -> Result<(), StorageError>;

    /// Fetch a single job.
    async fn get_outbox_message(&self, id: Uuid) -> Result<Option<OutboxMessage>, StorageError>;

    /// Number of rows currently `Queued`.
    async fn outbox_depth(&self) -> Result<u64, StorageError>;
}
