//! Server-side public key directory: one row per user in
//! `user_public_keys`.

use std::sync::Arc;

use chrono::Utc;
use reelchat_crypto::keys::PublicKey;
use reelchat_shared::api::keys::UserPublicKey;
use reelchat_shared::constants::USER_PUBLIC_KEYS_TABLE;
use reelchat_shared::ids::UserId;
use serde_json::json;

use crate::backend::{Backend, BackendError, Filter};
use crate::error::ClientError;

#[derive(Clone)]
pub struct PublicKeyDirectory {
    backend: Arc<dyn Backend>,
}

impl PublicKeyDirectory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Look up the published key row for `user_id`.
    ///
    /// `Ok(None)` means the user has never published. Backend failures are
    /// surfaced so callers can tell "no key" from "could not ask".
    pub async fn fetch(&self, user_id: UserId) -> Result<Option<UserPublicKey>, ClientError> {
        let rows = self
            .backend
            .query(USER_PUBLIC_KEYS_TABLE, &Filter::eq("user_id", json!(user_id)))
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    /// Fetch and decode the published key. A row that fails to decode is
    /// reported as `MalformedKey`.
    pub async fn fetch_key(&self, user_id: UserId) -> Result<Option<PublicKey>, ClientError> {
        match self.fetch(user_id).await? {
            Some(row) => Ok(Some(PublicKey::decode(&row.public_key)?)),
            None => Ok(None),
        }
    }

    /// Publish `key` for `user_id`, overwriting any existing row in place.
    pub async fn publish(&self, user_id: UserId, key: &PublicKey) -> Result<(), ClientError> {
        let record = serde_json::to_value(UserPublicKey::new(user_id, key.encode()))?;
        match self.backend.insert(USER_PUBLIC_KEYS_TABLE, record).await {
            Ok(_) => Ok(()),
            Err(BackendError::Conflict { .. }) => {
                let patch = json!({
                    "public_key": key.encode(),
                    "updated_at": Utc::now(),
                });
                self.backend
                    .update(
                        USER_PUBLIC_KEYS_TABLE,
                        &Filter::eq("user_id", json!(user_id)),
                        patch,
                    )
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
