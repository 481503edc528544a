//! AES-256-GCM encryption of secret values at rest

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::VaultError;

/// Number of PBKDF2 iterations for passphrase-derived keys
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Minimum accepted salt length in bytes
const MIN_SALT_LENGTH: usize = 16;

/// AES-256 key length in bytes
pub const KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes (96 bits)
const NONCE_LENGTH: usize = 12;

/// Symmetric cipher for secret values
///
/// Ciphertexts are `base64(nonce || ciphertext || tag)` with a fresh random
/// nonce per call, so encrypting the same value twice yields different output.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    /// Build a cipher from 32 raw key bytes
    pub fn from_key(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != KEY_LENGTH {
            return Err(VaultError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LENGTH,
                key.len()
            )));
        }

        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|e| VaultError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Build a cipher from a base64-encoded 32-byte key
    pub fn from_base64_key(encoded: &str) -> Result<Self, VaultError> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidKey(format!("key is not valid base64: {}", e)))?;
        Self::from_key(&key)
    }

    /// Derive the key from a passphrase and salt with PBKDF2-HMAC-SHA256
    pub fn derive_from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, VaultError> {
        if passphrase.is_empty() {
            return Err(VaultError::InvalidKey("passphrase is empty".to_string()));
        }
        if salt.len() < MIN_SALT_LENGTH {
            return Err(VaultError::InvalidKey(format!(
                "salt must be at least {} bytes",
                MIN_SALT_LENGTH
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        Self::from_key(&key)
    }

    /// Encrypt a plaintext value
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(combined))
    }

    /// Decrypt a value produced by [`SecretCipher::encrypt`]
    ///
    /// Fails on a wrong key, truncated data, or any tampering.
    pub fn decrypt(&self, encrypted: &str) -> Result<String, VaultError> {
        let combined = STANDARD
            .decode(encrypted)
            .map_err(|e| VaultError::Decryption(format!("invalid base64: {}", e)))?;

        if combined.len() < NONCE_LENGTH {
            return Err(VaultError::Decryption("encrypted data too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Decryption("authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| VaultError::Decryption("plaintext is not valid UTF-8".to_string()))
    }
}

/// Generate a random AES-256 key, base64 encoded
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut key);
    STANDARD.encode(key)
}
