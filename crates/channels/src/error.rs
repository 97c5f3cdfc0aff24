//! Typed error enum for the channel layer.

use outflow_storage::StorageError;
use thiserror::Error;

/// Channel-layer error covering provider HTTP failures, configuration
/// problems, and storage failures during webhook ingestion.
///
/// Send paths never propagate these to callers: they are folded into a
/// non-throwing `SendResult`. Webhook paths fold them into `WebhookResult`.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Tenant has no (or incomplete) configuration for this channel.
    #[error("channel not configured: {0}")]
    NotConfigured(String),

    /// HTTP client construction failed (TLS backend failure).
    #[error("client init: {0}")]
    ClientInit(String),

    /// Request-level failure (connect, timeout, body read).
    #[error("http request: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Non-success provider status after retries.
    #[error("provider returned {code}: {body}")]
    HttpStatus { code: u16, body: String },

    /// Circuit breaker is open; request was not attempted.
    #[error("circuit open")]
    CircuitOpen,

    /// Contact address missing or not normalizable for this channel.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Provider response body did not have the expected shape.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Stored credential could not be decrypted or parsed.
    #[error("credential error: {0}")]
    Credential(String),

    /// Storage failure during webhook ingestion.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

impl ChannelError {
    /// Whether this error is likely transient (worth retrying at the outbox
    /// level).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpRequest(_) | Self::CircuitOpen => true,
            Self::HttpStatus { code, .. } => {
                *code == 408 || *code == 429 || (500..600).contains(code)
            },
            Self::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}
