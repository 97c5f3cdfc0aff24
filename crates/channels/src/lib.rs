//! Provider channels for outflow
//!
//! One implementation per delivery channel (email, Twilio SMS, WhatsApp
//! Cloud), all behind the `MessageChannel` trait: outbound sends through the
//! provider API and idempotent ingestion of the provider's signed webhook
//! callbacks into canonical message-state transitions.

mod config;
mod email;
mod error;
mod http;
mod phone;
mod registry;
mod secrets;
pub mod signature;
mod sms;
mod traits;
mod types;
pub mod webhook;
mod whatsapp;

pub use config::{ChannelConfigProvider, EmailConfig, TwilioConfig, WhatsAppConfig};
pub use email::{EmailChannel, EMAIL_PROVIDER};
pub use error::ChannelError;
pub use http::RetryClient;
pub use phone::normalize_e164;
pub use registry::ChannelRegistry;
pub use secrets::SecretCipher;
pub use sms::{SmsChannel, SMS_PROVIDER};
pub use traits::MessageChannel;
pub use types::{SendResult, WebhookResult};
pub use whatsapp::{WhatsAppChannel, WHATSAPP_PROVIDER};
