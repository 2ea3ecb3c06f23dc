use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::AppError;

/// AES-256-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Symmetric cipher for tenant-setting values stored encrypted at rest.
///
/// The master key lives base64-encoded in `SystemSetting` and is generated
/// on first use. Ciphertext layout: `base64(nonce || ciphertext)`.
pub struct SettingCipher {
    cipher: Aes256Gcm,
}

impl SettingCipher {
    pub fn from_key_b64(key_b64: &str) -> Result<Self, AppError> {
        let key_bytes = BASE64
            .decode(key_b64)
            .map_err(|e| AppError::Config(format!("invalid encryption key encoding: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(AppError::Config(
                "encryption key must be 32 bytes".to_string(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Generates a fresh master key, returned base64-encoded for storage.
    pub fn generate_key_b64() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        BASE64.encode(key)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::InternalError("setting encryption failed".to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, AppError> {
        let combined = BASE64
            .decode(encoded)
            .map_err(|e| AppError::Validation(format!("invalid encrypted value: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(AppError::Validation(
                "encrypted value too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AppError::InternalError("setting decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::InternalError(format!("decrypted value not utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_values() {
        let key = SettingCipher::generate_key_b64();
        let cipher = SettingCipher::from_key_b64(&key).expect("key should parse");

        let secret = "fd-api-key-123";
        let encrypted = cipher.encrypt(secret).expect("encrypt");
        assert_ne!(encrypted, secret);
        assert_eq!(cipher.decrypt(&encrypted).expect("decrypt"), secret);
    }

    #[test]
    fn distinct_nonces_produce_distinct_ciphertexts() {
        let key = SettingCipher::generate_key_b64();
        let cipher = SettingCipher::from_key_b64(&key).expect("key should parse");

        let a = cipher.encrypt("same value").expect("encrypt");
        let b = cipher.encrypt("same value").expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(SettingCipher::from_key_b64("not-base64!").is_err());
        assert!(SettingCipher::from_key_b64(&BASE64.encode([0u8; 8])).is_err());
    }
}
