//! At-rest encryption for tenant channel credentials.
//!
//! Secret fields in `channel_configs.settings` are stored as
//! `base64(nonce || ciphertext)` under ChaCha20-Poly1305 with an
//! engine-wide key. The storage layer never sees plaintext.

use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};

use crate::error::ChannelError;

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts credential values.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Build from a 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self { cipher: ChaCha20Poly1305::new(Key::from_slice(key)) }
    }

    /// Build from a base64-encoded 32-byte key (the deployment format).
    ///
    /// # Errors
    /// Returns an error when the value is not base64 or not 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, ChannelError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ChannelError::Credential(format!("secret key not base64: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChannelError::Credential("secret key must be 32 bytes".to_owned()))?;
        Ok(Self::new(&key))
    }

    /// Encrypt a plaintext value for storage.
    ///
    /// # Errors
    /// Returns an error only on AEAD failure (should not happen in practice).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ChannelError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| ChannelError::Credential(format!("encrypt failed: {e}")))?;
        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    /// Decrypt a stored value.
    ///
    /// # Errors
    /// Returns an error when the value is malformed or authentication fails
    /// (wrong key, tampered ciphertext).
    pub fn decrypt(&self, stored: &str) -> Result<String, ChannelError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(stored.trim())
            .map_err(|e| ChannelError::Credential(format!("stored secret not base64: {e}")))?;
        if combined.len() <= NONCE_LEN {
            return Err(ChannelError::Credential("stored secret too short".to_owned()));
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ChannelError::Credential("decrypt failed (wrong key?)".to_owned()))?;
        String::from_utf8(plaintext)
            .map_err(|e| ChannelError::Credential(format!("secret not utf-8: {e}")))
    }
}
