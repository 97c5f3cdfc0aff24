//! Per-tenant channel configuration, with secrets decrypted at read time.
//!
//! Provider credentials live in `channel_configs.settings` as JSON. Secret
//! fields are stored encrypted under a `*_enc` key and decrypted here; the
//! rest of the engine only ever sees the typed plaintext config structs.

use std::sync::Arc;

use outflow_core::ChannelKind;
use outflow_storage::EngineStore;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ChannelError;
use crate::secrets::SecretCipher;

/// SendGrid-shaped email provider settings for one tenant.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub webhook_signing_key: String,
}

/// Twilio SMS settings for one tenant.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

/// WhatsApp Cloud API settings for one tenant.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub app_secret: String,
}

/// Loads and decrypts tenant channel settings from the store.
#[derive(Clone)]
pub struct ChannelConfigProvider {
    store: Arc<dyn EngineStore>,
    cipher: SecretCipher,
}

impl ChannelConfigProvider {
    pub fn new(store: Arc<dyn EngineStore>, cipher: SecretCipher) -> Self {
        Self { store, cipher }
    }

    /// # Errors
    /// `NotConfigured` when the tenant has no email settings or a required
    /// field is missing; `Credential` when a secret fails to decrypt.
    pub async fn email_config(&self, tenant_id: Uuid) -> Result<EmailConfig, ChannelError> {
        let settings = self.settings(tenant_id, ChannelKind::Email).await?;
        Ok(EmailConfig {
            api_key: self.secret(&settings, "api_key", ChannelKind::Email)?,
            from_email: required_str(&settings, "from_email", ChannelKind::Email)?,
            from_name: settings.get("from_name").and_then(Value::as_str).map(str::to_owned),
            webhook_signing_key: self.secret(&settings, "webhook_signing_key", ChannelKind::Email)?,
        })
    }

    /// # Errors
    /// `NotConfigured` when the tenant has no SMS settings or a required
    /// field is missing; `Credential` when a secret fails to decrypt.
    pub async fn twilio_config(&self, tenant_id: Uuid) -> Result<TwilioConfig, ChannelError> {
        let settings = self.settings(tenant_id, ChannelKind::Sms).await?;
        Ok(TwilioConfig {
            account_sid: required_str(&settings, "account_sid", ChannelKind::Sms)?,
            auth_token: self.secret(&settings, "auth_token", ChannelKind::Sms)?,
            from_number: required_str(&settings, "from_number", ChannelKind::Sms)?,
        })
    }

    /// # Errors
    /// `NotConfigured` when the tenant has no WhatsApp settings or a required
    /// field is missing; `Credential` when a secret fails to decrypt.
    pub async fn whatsapp_config(&self, tenant_id: Uuid) -> Result<WhatsAppConfig, ChannelError> {
        let settings = self.settings(tenant_id, ChannelKind::WhatsApp).await?;
        Ok(WhatsAppConfig {
            access_token: self.secret(&settings, "access_token", ChannelKind::WhatsApp)?,
            phone_number_id: required_str(&settings, "phone_number_id", ChannelKind::WhatsApp)?,
            app_secret: self.secret(&settings, "app_secret", ChannelKind::WhatsApp)?,
        })
    }

    async fn settings(&self, tenant_id: Uuid, channel: ChannelKind) -> Result<Value, ChannelError> {
        let record = self
            .store
            .get_channel_config(tenant_id, channel)
            .await?
            .ok_or_else(|| ChannelError::NotConfigured(channel.to_string()))?;
        Ok(record.settings)
    }

    /// Resolve a secret field: prefer the encrypted `<key>_enc` form, fall
    /// back to a plaintext `<key>` (used in tests and local setups).
    fn secret(
        &self,
        settings: &Value,
        key: &str,
        channel: ChannelKind,
    ) -> Result<String, ChannelError> {
        let enc_key = format!("{key}_enc");
        if let Some(enc) = settings.get(&enc_key).and_then(Value::as_str) {
            return self
                .cipher
                .decrypt(enc)
                .map_err(|e| ChannelError::Credential(format!("{channel} {key}: {e}")));
        }
        required_str(settings, key, channel)
    }
}

impl std::fmt::Debug for ChannelConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfigProvider").finish_non_exhaustive()
    }
}

fn required_str(settings: &Value, key: &str, channel: ChannelKind) -> Result<String, ChannelError> {
    settings
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ChannelError::NotConfigured(format!("{channel}: missing {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outflow_storage::{ChannelConfigRecord, MemoryStorage};

    fn cipher() -> SecretCipher {
        SecretCipher::new(&[7u8; 32])
    }

    async fn provider_with(settings: Value, channel: ChannelKind) -> (ChannelConfigProvider, Uuid) {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStorage::new());
        let tenant_id = Uuid::new_v4();
        store
            .upsert_channel_config(ChannelConfigRecord {
                tenant_id,
                channel,
                settings,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        (ChannelConfigProvider::new(store, cipher()), tenant_id)
    }

    #[tokio::test]
    async fn test_decrypts_encrypted_secret_fields() {
        let cipher = cipher();
        let settings = serde_json::json!({
            "account_sid": "AC123",
            "auth_token_enc": cipher.encrypt("tok-secret").unwrap(),
            "from_number": "+15550001111",
        });
        let (provider, tenant_id) = provider_with(settings, ChannelKind::Sms).await;

        let config = provider.twilio_config(tenant_id).await.unwrap();
        assert_eq!(config.auth_token, "tok-secret");
        assert_eq!(config.account_sid, "AC123");
    }

    #[tokio::test]
    async fn test_plaintext_fallback_for_secrets() {
        let settings = serde_json::json!({
            "api_key": "sk-plain",
            "from_email": "hello@acme.test",
            "webhook_signing_key": "whk-plain",
        });
        let (provider, tenant_id) = provider_with(settings, ChannelKind::Email).await;

        let config = provider.email_config(tenant_id).await.unwrap();
        assert_eq!(config.api_key, "sk-plain");
        assert_eq!(config.from_name, None);
    }

    #[tokio::test]
    async fn test_missing_config_is_not_configured() {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStorage::new());
        let provider = ChannelConfigProvider::new(store, cipher());
        let err = provider.whatsapp_config(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }
}
