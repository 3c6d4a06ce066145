use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use reelchat_crypto::error::CryptoError;
use reelchat_crypto::master_key::{generate_salt, MasterKey, DEFAULT_KEYCHAIN_SERVICE};
use reelchat_crypto::storage::{KeyStore, KeychainKeyStore, MemoryKeyStore, SqliteKeyStore};
use reelchat_shared::constants::MAX_MESSAGE_SIZE_BYTES;
use serde::Deserialize;

use crate::error::ClientError;

/// Where the device keypair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreKind {
    /// SQLCipher-encrypted file at `key_store_path`.
    Sqlite,
    /// OS keychain entry under `keychain_service`.
    Keychain,
    /// Process memory. Keys are lost on exit.
    Memory,
}

impl FromStr for KeyStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(KeyStoreKind::Sqlite),
            "keychain" => Ok(KeyStoreKind::Keychain),
            "memory" => Ok(KeyStoreKind::Memory),
            other => Err(format!("unknown key store kind: {other}")),
        }
    }
}

/// Client configuration loaded from reelchat.toml with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Key store backend. Default: sqlite
    #[serde(default = "default_key_store")]
    pub key_store: KeyStoreKind,
    /// Path of the encrypted key store file. Default: "reelchat-keys.db"
    #[serde(default = "default_key_store_path")]
    pub key_store_path: String,
    /// OS keychain service name. Default: "com.reelchat.keystore"
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,
    /// Tracing log level. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-conversation listener buffer. Default: 256
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Largest plaintext message body in bytes. Default: 8192
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_key_store() -> KeyStoreKind {
    KeyStoreKind::Sqlite
}
fn default_key_store_path() -> String {
    "reelchat-keys.db".to_string()
}
fn default_keychain_service() -> String {
    DEFAULT_KEYCHAIN_SERVICE.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_event_buffer() -> usize {
    256
}
fn default_max_message_bytes() -> usize {
    MAX_MESSAGE_SIZE_BYTES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            key_store: default_key_store(),
            key_store_path: default_key_store_path(),
            keychain_service: default_keychain_service(),
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from TOML file with environment variable overrides.
    ///
    /// Reads `reelchat.toml` from CWD (or path in `REELCHAT_CONFIG`). A
    /// missing file means defaults plus env overrides.
    pub fn load() -> Result<Self, ClientError> {
        let path =
            std::env::var("REELCHAT_CONFIG").unwrap_or_else(|_| "reelchat.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path, "no config file, using defaults");
                let mut config = Self::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(ClientError::Config(format!("cannot read {path}: {e}"))),
        }
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ClientError> {
        let mut config: ClientConfig =
            toml::from_str(toml_str).map_err(|e| ClientError::Config(e.to_string()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the config.
    ///
    /// Returns an error if an env var is set but has an invalid format
    /// (e.g., REELCHAT_EVENT_BUFFER=abc).
    pub fn apply_env_overrides(&mut self) -> Result<(), ClientError> {
        if let Ok(val) = std::env::var("REELCHAT_KEY_STORE") {
            self.key_store = val.parse().map_err(ClientError::Config)?;
        }
        if let Ok(val) = std::env::var("REELCHAT_KEY_STORE_PATH") {
            self.key_store_path = val;
        }
        if let Ok(val) = std::env::var("REELCHAT_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("REELCHAT_EVENT_BUFFER") {
            self.event_buffer = val
                .parse()
                .map_err(|_| ClientError::Config(format!("invalid REELCHAT_EVENT_BUFFER value: {val}")))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ClientError> {
        if self.event_buffer == 0 {
            return Err(ClientError::Config("event_buffer must be positive".into()));
        }
        if self.max_message_bytes == 0 {
            return Err(ClientError::Config("max_message_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Open the configured key store.
    ///
    /// The SQLCipher store is keyed from the OS keychain when one exists,
    /// otherwise from `passphrase` with a salt stored next to the database.
    /// Blocking: may touch the keychain and run Argon2.
    pub fn open_key_store(&self, passphrase: Option<&str>) -> Result<Arc<dyn KeyStore>, ClientError> {
        let store: Arc<dyn KeyStore> = match self.key_store {
            KeyStoreKind::Memory => Arc::new(MemoryKeyStore::new()),
            KeyStoreKind::Keychain => Arc::new(KeychainKeyStore::new(self.keychain_service.clone())),
            KeyStoreKind::Sqlite => {
                let master = match MasterKey::from_keychain(&self.keychain_service) {
                    Ok(master) => master,
                    Err(CryptoError::KeychainUnavailable) => {
                        tracing::info!("OS keychain unavailable, using passphrase-derived key");
                        let passphrase = passphrase.ok_or(CryptoError::PassphraseRequired)?;
                        let salt = load_or_create_salt(&self.salt_path())?;
                        MasterKey::from_passphrase(passphrase, &salt)?
                    }
                    Err(e) => return Err(e.into()),
                };
                let db_key = master.derive_db_key()?;
                Arc::new(SqliteKeyStore::open(Path::new(&self.key_store_path), &db_key)?)
            }
        };
        Ok(store)
    }

    fn salt_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.salt", self.key_store_path))
    }
}

fn load_or_create_salt(path: &Path) -> Result<Vec<u8>, CryptoError> {
    match std::fs::read(path) {
        Ok(salt) => Ok(salt),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let salt = generate_salt()?;
            std::fs::write(path, salt)
                .map_err(|e| CryptoError::StorageError(format!("cannot write salt: {e}")))?;
            Ok(salt.to_vec())
        }
        Err(e) => Err(CryptoError::StorageError(format!("cannot read salt: {e}"))),
    }
}
