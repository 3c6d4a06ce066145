//! Master key handling for the encrypted on-disk key store.
//!
//! A 32-byte master key comes from the OS keychain (generated on first use)
//! or from a user passphrase via Argon2id. The SQLCipher database key is
//! derived from it with HKDF-SHA256, so the master key itself never reaches
//! SQLite.

use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::keys::random_bytes;

pub const DEFAULT_KEYCHAIN_SERVICE: &str = "com.reelchat.keystore";
const KEYCHAIN_ACCOUNT: &str = "master_key";
const DB_KEY_INFO: &[u8] = b"reelchat-keystore-db-v1";
const MIN_SALT_LEN: usize = 16;

/// A 32-byte master key, securely wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; 32],
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl MasterKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Retrieve the master key from the OS keychain, creating it on first run.
    pub fn from_keychain(service: &str) -> Result<Self, CryptoError> {
        let entry = keyring::Entry::new(service, KEYCHAIN_ACCOUNT)
            .map_err(|_| CryptoError::KeychainUnavailable)?;

        match entry.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                let bytes = Zeroizing::new(
                    base64::engine::general_purpose::STANDARD
                        .decode(encoded.as_bytes())
                        .map_err(|_| {
                            CryptoError::KeychainError("malformed master key in keychain".into())
                        })?,
                );
                if bytes.len() != 32 {
                    return Err(CryptoError::KeychainError(
                        "malformed master key in keychain".into(),
                    ));
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                Ok(Self { key })
            }
            Err(keyring::Error::NoEntry) => {
                let fresh = random_bytes::<32>().map_err(CryptoError::KeyGenerationFailed)?;
                let encoded = Zeroizing::new(
                    base64::engine::general_purpose::STANDARD.encode(fresh.as_ref()),
                );
                entry.set_password(&encoded)?;
                tracing::info!(service, "created keystore master key in OS keychain");
                Ok(Self { key: *fresh })
            }
            Err(e) => Err(CryptoError::from(e)),
        }
    }

    /// Derive a master key from a user passphrase and salt via Argon2id.
    /// Used where no OS keychain is available.
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self, CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::PassphraseRequired);
        }
        if salt.len() < MIN_SALT_LEN {
            return Err(CryptoError::MalformedKey("salt too short".into()));
        }

        let params = argon2::Params::new(65536, 3, 4, Some(32))
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        let argon2 =
            argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

        let mut key = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Derive the SQLCipher database key.
    pub fn derive_db_key(&self) -> Result<DbEncryptionKey, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, &self.key);
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(DB_KEY_INFO, okm.as_mut())
            .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;

        let mut hex = String::with_capacity(67);
        hex.push_str("x'");
        for b in okm.iter() {
            hex.push_str(&format!("{b:02x}"));
        }
        hex.push('\'');
        Ok(DbEncryptionKey { pragma: hex })
    }
}

/// Generate a random salt for passphrase derivation.
pub fn generate_salt() -> Result<[u8; MIN_SALT_LEN], CryptoError> {
    let salt = random_bytes::<MIN_SALT_LEN>().map_err(CryptoError::KeyGenerationFailed)?;
    Ok(*salt)
}

/// Raw-key literal for SQLCipher's `PRAGMA key`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DbEncryptionKey {
    pragma: String,
}

impl std::fmt::Debug for DbEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbEncryptionKey")
            .field("pragma", &"[REDACTED]")
            .finish()
    }
}

impl DbEncryptionKey {
    pub fn as_pragma_value(&self) -> &str {
        &self.pragma
    }
}

/// Key a SQLCipher connection and configure it.
///
/// The `x'...'` literal must be embedded in SQL: bound as a parameter,
/// SQLCipher would treat it as a passphrase and run PBKDF2 over it.
pub fn apply_encryption_key(
    conn: &rusqlite::Connection,
    db_key: &DbEncryptionKey,
) -> Result<(), CryptoError> {
    conn.execute_batch(&format!("PRAGMA key = \"{}\";", db_key.as_pragma_value()))?;

    let cipher_version: String = conn
        .pragma_query_value(None, "cipher_version", |row| row.get(0))
        .map_err(|_| CryptoError::StorageError("SQLCipher not available".into()))?;
    if cipher_version.is_empty() {
        return Err(CryptoError::StorageError("SQLCipher not available".into()));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    Ok(())
}
