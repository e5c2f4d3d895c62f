//! Credential field encryption.
//!
//! API keys and secrets for linked exchanges are stored encrypted, one
//! ciphertext per field. Each field carries its own salt and nonce:
//! base64(salt[16] || nonce[12] || ciphertext). Keys are derived from a
//! passphrase with Argon2, so nothing secret ever lands on disk in the
//! clear.

use aes_gcm::{
    aead::{
        rand_core::{OsRng, RngCore},
        Aead, KeyInit,
    },
    Aes256Gcm, Key, Nonce,
};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use crate::config::ENV_PASSPHRASE;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to derive key: {0}")]
    KeyDerivation(String),
    #[error("Encryption failed: {0}")]
    Encrypt(String),
    #[error("Decryption failed. Wrong passphrase?")]
    Decrypt,
    #[error("Invalid ciphertext format")]
    Malformed,
    #[error("Passphrase cannot be empty")]
    EmptyPassphrase,
    #[error("Failed to read passphrase: {0}")]
    Prompt(String),
}

/// Encrypts and decrypts individual credential fields.
#[derive(Clone)]
pub struct CredentialCipher {
    passphrase: String,
}

impl CredentialCipher {
    pub fn new(passphrase: impl Into<String>) -> Result<Self, CryptoError> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(CryptoError::EmptyPassphrase);
        }
        Ok(Self { passphrase })
    }

    /// Resolve the passphrase from the environment, prompting on the
    /// terminal when it is not set.
    pub fn from_env_or_prompt() -> Result<Self, CryptoError> {
        if let Ok(passphrase) = std::env::var(ENV_PASSPHRASE) {
            return Self::new(passphrase);
        }

        let passphrase =
            rpassword::prompt_password("Enter passphrase for credential encryption: ")
                .map_err(|e| CryptoError::Prompt(e.to_string()))?;
        Self::new(passphrase)
    }

    /// Derive encryption key from passphrase
    fn derive_key(&self, salt: &[u8]) -> Result<Key<Aes256Gcm>, CryptoError> {
        let mut key_bytes = [0u8; 32];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key_bytes)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(*Key::<Aes256Gcm>::from_slice(&key_bytes))
    }

    /// Encrypt a single field to base64(salt || nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(&salt)?;
        let cipher = Aes256Gcm::new(&key);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut output = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&salt);
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(output))
    }

    /// Decrypt a field produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let encrypted = BASE64.decode(encoded).map_err(|_| CryptoError::Malformed)?;

        if encrypted.len() < SALT_LEN + NONCE_LEN {
            return Err(CryptoError::Malformed);
        }

        let salt = &encrypted[..SALT_LEN];
        let nonce_bytes = &encrypted[SALT_LEN..SALT_LEN + NONCE_LEN];
        let ciphertext = &encrypted[SALT_LEN + NONCE_LEN..];

        let key = self.derive_key(salt)?;
        let cipher = Aes256Gcm::new(&key);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = CredentialCipher::new("correct horse").unwrap();
        let encrypted = cipher.encrypt("api-key-12345").unwrap();
        assert_ne!(encrypted, "api-key-12345");
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "api-key-12345");
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let cipher = CredentialCipher::new("correct horse").unwrap();
        let encrypted = cipher.encrypt("api-key-12345").unwrap();

        let other = CredentialCipher::new("battery staple").unwrap();
        assert!(matches!(other.decrypt(&encrypted), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_fresh_salt_per_field() {
        let cipher = CredentialCipher::new("correct horse").unwrap();
        let a = cipher.encrypt("same-secret").unwrap();
        let b = cipher.encrypt("same-secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_input() {
        let cipher = CredentialCipher::new("correct horse").unwrap();
        assert!(matches!(cipher.decrypt("not base64!!"), Err(CryptoError::Malformed)));
        assert!(matches!(cipher.decrypt("AAAA"), Err(CryptoError::Malformed)));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(
            CredentialCipher::new(""),
            Err(CryptoError::EmptyPassphrase)
        ));
    }
}
