//! Device key lifecycle: make sure this device has a keypair and that its
//! public half is what the directory serves to peers.
//!
//! Key material is persisted locally before any network call. Network steps
//! are best-effort: failures are logged and reported through
//! [`EnsureOutcome`] instead of an error, because local decryption works
//! without connectivity once keys exist.

use std::sync::Arc;

use reelchat_crypto::error::CryptoError;
use reelchat_crypto::fingerprint::short_fingerprint;
use reelchat_crypto::hybrid::{HybridCipher, HybridEncryption};
use reelchat_crypto::keys::{KeyPair, PublicKey};
use reelchat_crypto::storage::{load_keypair, save_keypair, KeyStore};
use reelchat_shared::ids::UserId;
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::directory::PublicKeyDirectory;
use crate::error::ClientError;

/// What `ensure_keys_exist` found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The directory already serves this device's public key.
    AlreadyPublished,
    /// The local public key was published. `generated` is true if the
    /// keypair was created by this call.
    Published { generated: bool },
    /// Keys exist locally but the directory could not be read or written.
    /// Peers cannot send to this user until a later ensure succeeds.
    PublishFailed { generated: bool },
    /// Local keys were missing while the directory held a key. A new keypair
    /// replaced it; messages sealed under the old key are unreadable here.
    /// `published` is false if the new key could not be written to the
    /// directory, which still serves the orphaned key until a later ensure.
    Regenerated {
        orphaned_previous_key: PublicKey,
        published: bool,
    },
    /// The directory held a different or undecodable key. The local key was
    /// republished over it.
    ServerKeyMismatch,
}

impl EnsureOutcome {
    /// True if peers can currently encrypt to this device.
    pub fn is_published(&self) -> bool {
        !matches!(
            self,
            EnsureOutcome::PublishFailed { .. } | EnsureOutcome::Regenerated { published: false, .. }
        )
    }
}

pub struct KeyManager {
    directory: PublicKeyDirectory,
    key_store: Arc<dyn KeyStore>,
    cipher: Arc<dyn HybridEncryption>,
    ensure_lock: Mutex<()>,
}

/// Run a key store or cipher call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ClientError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::StorageError(format!("key task failed: {e}")))?;
    Ok(result?)
}

impl KeyManager {
    pub fn new(backend: Arc<dyn Backend>, key_store: Arc<dyn KeyStore>) -> Self {
        Self::with_cipher(backend, key_store, Arc::new(HybridCipher::new()))
    }

    pub fn with_cipher(
        backend: Arc<dyn Backend>,
        key_store: Arc<dyn KeyStore>,
        cipher: Arc<dyn HybridEncryption>,
    ) -> Self {
        Self {
            directory: PublicKeyDirectory::new(backend),
            key_store,
            cipher,
            ensure_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &PublicKeyDirectory {
        &self.directory
    }

    /// Idempotently ensure this device has a keypair and that it is
    /// published for `user_id`.
    ///
    /// Errors are limited to local failures: key generation, or a key store
    /// that cannot be read or written. Concurrent calls are serialized, so
    /// they never produce two different keypairs.
    pub async fn ensure_keys_exist(&self, user_id: UserId) -> Result<EnsureOutcome, ClientError> {
        let _guard = self.ensure_lock.lock().await;

        let published = match self.directory.fetch(user_id).await {
            Ok(row) => row,
            Err(ClientError::BackendUnavailable(reason)) => {
                let (pair, generated) = self.local_or_generate().await?;
                tracing::warn!(
                    user_id = %user_id,
                    fingerprint = %short_fingerprint(&pair.public),
                    %reason,
                    "key directory lookup failed, publish skipped"
                );
                return Ok(EnsureOutcome::PublishFailed { generated });
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "published key row is invalid");
                return self.republish_local(user_id).await;
            }
        };

        let Some(row) = published else {
            let (pair, generated) = self.local_or_generate().await?;
            return Ok(self.publish(user_id, &pair.public, generated).await);
        };

        let server_key = match PublicKey::decode(&row.public_key) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "published key does not decode");
                return self.republish_local(user_id).await;
            }
        };

        match self.load_local().await? {
            Some(pair) if pair.public.ct_matches(&server_key) => {
                tracing::debug!(
                    user_id = %user_id,
                    fingerprint = %short_fingerprint(&pair.public),
                    "keys already published"
                );
                Ok(EnsureOutcome::AlreadyPublished)
            }
            Some(pair) => {
                tracing::warn!(
                    user_id = %user_id,
                    local = %short_fingerprint(&pair.public),
                    server = %short_fingerprint(&server_key),
                    "published key differs from local key, republishing"
                );
                Ok(match self.publish(user_id, &pair.public, false).await {
                    EnsureOutcome::Published { .. } => EnsureOutcome::ServerKeyMismatch,
                    other => other,
                })
            }
            None => {
                tracing::warn!(
                    user_id = %user_id,
                    orphaned = %short_fingerprint(&server_key),
                    "local keys missing while a key is published; regenerating, \
                     messages sealed under the old key become unreadable"
                );
                let pair = self.generate_and_persist().await?;
                let published = self.publish(user_id, &pair.public, true).await.is_published();
                Ok(EnsureOutcome::Regenerated {
                    orphaned_previous_key: server_key,
                    published,
                })
            }
        }
    }

    /// The device keypair. Fails with `KeysNotInitialized` before the first
    /// successful ensure.
    pub async fn local_keys(&self) -> Result<KeyPair, ClientError> {
        self.load_local()
            .await?
            .ok_or(ClientError::KeysNotInitialized)
    }

    /// Replace the device keypair and publish the new public key.
    ///
    /// Destructive: every message sealed under the old key, including this
    /// device's own sent copies, becomes undecryptable. This is the recovery
    /// path for a stored keypair that fails with `MalformedKey`.
    pub async fn reset_keys(&self, user_id: UserId) -> Result<EnsureOutcome, ClientError> {
        let _guard = self.ensure_lock.lock().await;
        let pair = self.generate_and_persist().await?;
        tracing::warn!(
            user_id = %user_id,
            fingerprint = %short_fingerprint(&pair.public),
            "device keys reset"
        );
        Ok(self.publish(user_id, &pair.public, true).await)
    }

    async fn republish_local(&self, user_id: UserId) -> Result<EnsureOutcome, ClientError> {
        let (pair, generated) = self.local_or_generate().await?;
        Ok(match self.publish(user_id, &pair.public, generated).await {
            EnsureOutcome::Published { .. } => EnsureOutcome::ServerKeyMismatch,
            other => other,
        })
    }

    /// Best-effort publish. Never fails; the outcome says whether it worked.
    async fn publish(&self, user_id: UserId, key: &PublicKey, generated: bool) -> EnsureOutcome {
        match self.directory.publish(user_id, key).await {
            Ok(()) => {
                tracing::info!(
                    user_id = %user_id,
                    fingerprint = %short_fingerprint(key),
                    generated,
                    "public key published"
                );
                EnsureOutcome::Published { generated }
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    fingerprint = %short_fingerprint(key),
                    error = %e,
                    "public key publish failed"
                );
                EnsureOutcome::PublishFailed { generated }
            }
        }
    }

    async fn local_or_generate(&self) -> Result<(KeyPair, bool), ClientError> {
        match self.load_local().await? {
            Some(pair) => Ok((pair, false)),
            None => Ok((self.generate_and_persist().await?, true)),
        }
    }

    async fn load_local(&self) -> Result<Option<KeyPair>, ClientError> {
        let store = self.key_store.clone();
        blocking(move || load_keypair(store.as_ref())).await
    }

    async fn generate_and_persist(&self) -> Result<KeyPair, ClientError> {
        let store = self.key_store.clone();
        let cipher = self.cipher.clone();
        blocking(move || {
            let pair = cipher.generate_key_pair()?;
            save_keypair(store.as_ref(), &pair)?;
            Ok(pair)
        })
        .await
    }
}
