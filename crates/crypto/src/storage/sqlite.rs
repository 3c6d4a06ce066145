//! SQLCipher-backed key store: an encrypted file on disk.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::master_key::{apply_encryption_key, DbEncryptionKey};
use crate::storage::migrations::run_keystore_migrations;
use crate::storage::KeyStore;

pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Open (or create) the encrypted key store at `path`.
    pub fn open(path: &Path, db_key: &DbEncryptionKey) -> Result<Self, CryptoError> {
        let conn = Connection::open(path)?;
        Self::init(conn, db_key)
    }

    pub fn open_in_memory(db_key: &DbEncryptionKey) -> Result<Self, CryptoError> {
        Self::init(Connection::open_in_memory()?, db_key)
    }

    fn init(conn: Connection, db_key: &DbEncryptionKey) -> Result<Self, CryptoError> {
        apply_encryption_key(&conn, db_key)?;
        run_keystore_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CryptoError> {
        self.conn
            .lock()
            .map_err(|_| CryptoError::StorageError("key store connection lock poisoned".into()))
    }
}

impl KeyStore for SqliteKeyStore {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        let value: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                "SELECT value FROM key_store WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(Zeroizing::new))
    }

    fn put(&self, name: &str, value: &[u8]) -> Result<(), CryptoError> {
        let now = chrono::Utc::now().timestamp();
        self.conn()?.execute(
            "INSERT INTO key_store (name, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![name, value, now],
        )?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), CryptoError> {
        self.conn()?
            .execute("DELETE FROM key_store WHERE name = ?1", [name])?;
        Ok(())
    }
}
