//! Durable per-device key storage.
//!
//! `KeyStore` is a small name → bytes capability. The device keypair is one
//! record under `KEYPAIR_ENTRY_NAME`, so persisting it is a single atomic
//! `put`. Regenerating overwrites the record without migration.

use std::collections::HashMap;
use std::sync::Mutex;

use reelchat_shared::constants::KEYPAIR_ENTRY_NAME;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::KeyPair;

pub mod keychain;
pub mod migrations;
pub mod sqlite;

pub use keychain::KeychainKeyStore;
pub use sqlite::SqliteKeyStore;

pub trait KeyStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError>;

    fn put(&self, name: &str, value: &[u8]) -> Result<(), CryptoError>;

    fn delete(&self, name: &str) -> Result<(), CryptoError>;
}

/// Load the device keypair, if one has been stored.
pub fn load_keypair(store: &dyn KeyStore) -> Result<Option<KeyPair>, CryptoError> {
    match store.get(KEYPAIR_ENTRY_NAME)? {
        Some(record) => KeyPair::from_record(&record).map(Some),
        None => Ok(None),
    }
}

/// Persist the device keypair, replacing any previous one.
pub fn save_keypair(store: &dyn KeyStore, pair: &KeyPair) -> Result<(), CryptoError> {
    let record = pair.to_record()?;
    store.put(KEYPAIR_ENTRY_NAME, &record)
}

pub fn delete_keypair(store: &dyn KeyStore) -> Result<(), CryptoError> {
    store.delete(KEYPAIR_ENTRY_NAME)
}

/// Process-local store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Zeroizing<Vec<u8>>>>, CryptoError> {
        self.entries
            .lock()
            .map_err(|_| CryptoError::StorageError("memory key store lock poisoned".into()))
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn put(&self, name: &str, value: &[u8]) -> Result<(), CryptoError> {
        self.lock()?
            .insert(name.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), CryptoError> {
        self.lock()?.remove(name);
        Ok(())
    }
}

/// In-memory SQLCipher connection with migrations applied.
#[cfg(test)]
pub(crate) fn init_test_db() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "PRAGMA key = \"x'0000000000000000000000000000000000000000000000000000000000000000'\";",
    )
    .unwrap();
    migrations::run_keystore_migrations(&conn).unwrap();
    conn
}
