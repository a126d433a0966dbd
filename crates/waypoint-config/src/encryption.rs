//! AES-256-GCM encryption for credentials and secret config values.
//!
//! Ciphertexts are hex-encoded with the random 96-bit nonce prepended, so a
//! single string column can hold everything needed to decrypt.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;

/// Encryptor for sensitive data at rest.
#[derive(Clone)]
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    /// Create a new encryptor from a hex-encoded 256-bit key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid 64-character hex string.
    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let key_bytes = Zeroizing::new(
            hex::decode(hex_key).context("Invalid hex encoding for encryption key")?,
        );

        if key_bytes.len() != 32 {
            anyhow::bail!(
                "Encryption key must be 256 bits (64 hex characters), got {} bytes",
                key_bytes.len()
            );
        }

        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a plaintext string.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend(ciphertext);
        Ok(hex::encode(sealed))
    }

    /// Decrypt a hex-encoded ciphertext (with prepended nonce).
    ///
    /// Returns the plaintext as a `SecretString` to prevent accidental logging.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails or the ciphertext is malformed.
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<SecretString> {
        let data = hex::decode(ciphertext_hex).context("Invalid hex encoding for ciphertext")?;

        if data.len() < NONCE_SIZE {
            anyhow::bail!("Ciphertext too short (must include nonce)");
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {e}"))?;

        let plaintext_str =
            String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")?;

        Ok(SecretString::from(plaintext_str))
    }

    /// Encrypt a serializable value as JSON.
    ///
    /// Used for plugin credential records.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = serde_json::to_string(value).context("Failed to serialize for encryption")?;
        self.encrypt(&json)
    }

    /// Decrypt and deserialize a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption or deserialization fails.
    pub fn decrypt_json<T: DeserializeOwned>(&self, ciphertext_hex: &str) -> Result<T> {
        let plaintext = self.decrypt(ciphertext_hex)?;
        serde_json::from_str(plaintext.expose_secret())
            .context("Decrypted payload is not the expected JSON shape")
    }
}
