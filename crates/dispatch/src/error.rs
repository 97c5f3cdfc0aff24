//! Typed error enum for the dispatch layer.

use outflow_channels::ChannelError;
use outflow_core::ChannelKind;
use outflow_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Dispatch-layer error.
///
/// Expected business conditions (guard vetoes, rate-limit denials, send
/// failures) are not errors here; they flow through verdicts, results, and
/// outbox state. This enum covers infrastructure failures and caller
/// mistakes at the enqueue API.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("channel: {0}")]
    Channel(#[from] ChannelError),

    /// No implementation registered for the job's channel.
    #[error("no channel registered for {0}")]
    ChannelUnavailable(ChannelKind),

    /// Enqueue referenced a template that does not exist for the tenant.
    #[error("template {template_id} not found for tenant {tenant_id}")]
    TemplateNotFound { tenant_id: Uuid, template_id: Uuid },

    /// Enqueue supplied variables that do not satisfy the template schema,
    /// or the template failed the channel's validation.
    #[error("template {name} rejected: {reason}")]
    TemplateRejected { name: String, reason: String },
}
