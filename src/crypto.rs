//! Cryptographic capability used by the item pipeline.
//!
//! The client never chooses algorithms itself. Keys are opaque string ids
//! resolved by the provider.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unknown key id: {0}")]
    UnknownKey(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Signing failed: {0}")]
    Sign(String),
}

pub trait CryptoProvider: Send + Sync {
    fn encrypt_with_transport_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_with_transport_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn encrypt_with_public_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_with_secret_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn create_signature(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Returns false for a bad signature or an unverifiable key. Never errors.
    fn verify_signature(&self, key_id: &str, data: &[u8], signature: &[u8]) -> bool;
}

/// Provider with no keys. Any keyed operation fails with `UnknownKey`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeys;

impl CryptoProvider for NoKeys {
    fn encrypt_with_transport_key(&self, key_id: &str, _: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::UnknownKey(key_id.to_string()))
    }

    fn decrypt_with_transport_key(&self, key_id: &str, _: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::UnknownKey(key_id.to_string()))
    }

    fn encrypt_with_public_key(&self, key_id: &str, _: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::UnknownKey(key_id.to_string()))
    }

    fn decrypt_with_secret_key(&self, key_id: &str, _: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::UnknownKey(key_id.to_string()))
    }

    fn create_signature(&self, key_id: &str, _: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::UnknownKey(key_id.to_string()))
    }

    fn verify_signature(&self, _: &str, _: &[u8], _: &[u8]) -> bool {
        false
    }
}
