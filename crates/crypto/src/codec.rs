//! Builds and reads the dual-ciphertext message record.
//!
//! Every outgoing message is encrypted twice, independently: once for the
//! sender's own key so sent history stays readable on this device, and once
//! for the receiver.

use chrono::{DateTime, Utc};
use reelchat_shared::api::message::{ChatMessage, EncryptedPayload, MessageKind, MessageStatus};
use reelchat_shared::ids::{MessageId, UserId};

use crate::error::CryptoError;
use crate::hybrid::{HybridCipher, HybridEncryption};
use crate::keys::{PrivateKey, PublicKey};

/// The two sealed copies of one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingCopies {
    pub sender_copy: EncryptedPayload,
    pub receiver_copy: EncryptedPayload,
}

/// Local-only plaintext projection of a `ChatMessage`. Deliberately not
/// serializable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub status: MessageStatus,
    pub is_mine: bool,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

pub struct MessageCodec<C = HybridCipher> {
    cipher: C,
}

impl MessageCodec<HybridCipher> {
    pub fn new() -> Self {
        Self {
            cipher: HybridCipher::new(),
        }
    }
}

impl Default for MessageCodec<HybridCipher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: HybridEncryption> MessageCodec<C> {
    pub fn with_cipher(cipher: C) -> Self {
        Self { cipher }
    }

    pub fn cipher(&self) -> &C {
        &self.cipher
    }

    /// Encrypt `plaintext` once per participant key.
    ///
    /// A missing receiver key short-circuits with `RecipientKeyMissing`
    /// before any cipher work.
    pub fn encrypt_for_send(
        &self,
        plaintext: &[u8],
        sender_public: &PublicKey,
        receiver_public: Option<&PublicKey>,
    ) -> Result<OutgoingCopies, CryptoError> {
        let receiver_public = receiver_public.ok_or(CryptoError::RecipientKeyMissing)?;

        let sender_copy = self.cipher.encrypt(plaintext, sender_public)?;
        let receiver_copy = self.cipher.encrypt(plaintext, receiver_public)?;

        Ok(OutgoingCopies {
            sender_copy,
            receiver_copy,
        })
    }

    /// Decrypt whichever copy matches the local user's role in `message`.
    pub fn decrypt_for_display(
        &self,
        message: &ChatMessage,
        local_user: UserId,
        private_key: &PrivateKey,
    ) -> Result<DecryptedChatMessage, CryptoError> {
        let payload = message.payload_for(local_user).ok_or_else(|| {
            CryptoError::DecryptionFailed(format!(
                "user {local_user} is not a participant of message {}",
                message.id
            ))
        })?;

        let plaintext = self.cipher.decrypt(payload, private_key)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| CryptoError::DecryptionFailed("plaintext is not valid UTF-8".into()))?;

        Ok(DecryptedChatMessage {
            id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            message: text,
            status: message.status,
            is_mine: local_user == message.sender_id,
            kind: message.kind.clone(),
            created_at: message.created_at,
        })
    }
}
