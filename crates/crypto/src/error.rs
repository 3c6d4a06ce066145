//! Error types for the reelchat-crypto crate.

use thiserror::Error;

/// Errors that can occur during key management and hybrid encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The entropy source failed while generating key material. Not retryable
    /// within the same call.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Local or remote key material failed to decode.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// The symmetric cipher refused to seal the message body.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Wrong private key, or ciphertext/IV failed authentication.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The receiver has not published a public key yet.
    #[error("recipient public key missing")]
    RecipientKeyMissing,

    /// Key store backing storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// OS keychain operation failed.
    #[error("keychain error: {0}")]
    KeychainError(String),

    /// No credential found in OS keychain for the requested entry.
    #[error("keychain entry not found")]
    KeychainEntryNotFound,

    /// OS keychain is not available on this platform; triggers the passphrase fallback.
    #[error("keychain unavailable")]
    KeychainUnavailable,

    /// A passphrase is required but was not provided.
    #[error("passphrase required")]
    PassphraseRequired,

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl CryptoError {
    /// Errors that mean the locally stored keypair can no longer be used.
    /// Recovery is a destructive key reset.
    pub fn requires_key_reset(&self) -> bool {
        matches!(self, CryptoError::MalformedKey(_))
    }
}

impl From<rusqlite::Error> for CryptoError {
    fn from(err: rusqlite::Error) -> Self {
        CryptoError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::MalformedKey(err.to_string())
    }
}

impl From<CryptoError> for reelchat_shared::error::ReelChatError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::RecipientKeyMissing => {
                reelchat_shared::error::ReelChatError::RecipientKeyMissing
            }
            other => reelchat_shared::error::ReelChatError::Crypto(other.to_string()),
        }
    }
}

impl From<keyring::Error> for CryptoError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => CryptoError::KeychainEntryNotFound,
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                CryptoError::KeychainUnavailable
            }
            other => CryptoError::KeychainError(other.to_string()),
        }
    }
}
