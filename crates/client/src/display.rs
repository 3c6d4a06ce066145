//! What the UI renders for one message. A message that fails to decrypt is
//! still shown, as a placeholder, never dropped.

use chrono::{DateTime, Utc};
use reelchat_crypto::codec::{DecryptedChatMessage, MessageCodec};
use reelchat_crypto::hybrid::HybridEncryption;
use reelchat_crypto::keys::PrivateKey;
use reelchat_shared::api::message::{ChatMessage, MessageKind, MessageStatus};
use reelchat_shared::constants::UNDECRYPTABLE_PLACEHOLDER;
use reelchat_shared::ids::{MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMessage {
    Decrypted(DecryptedChatMessage),
    Undecryptable {
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        is_mine: bool,
        status: MessageStatus,
        kind: MessageKind,
        created_at: DateTime<Utc>,
        reason: String,
    },
}

impl DisplayMessage {
    pub fn id(&self) -> MessageId {
        match self {
            DisplayMessage::Decrypted(m) => m.id,
            DisplayMessage::Undecryptable { id, .. } => *id,
        }
    }

    pub fn is_mine(&self) -> bool {
        match self {
            DisplayMessage::Decrypted(m) => m.is_mine,
            DisplayMessage::Undecryptable { is_mine, .. } => *is_mine,
        }
    }

    pub fn status(&self) -> MessageStatus {
        match self {
            DisplayMessage::Decrypted(m) => m.status,
            DisplayMessage::Undecryptable { status, .. } => *status,
        }
    }

    pub fn kind(&self) -> &MessageKind {
        match self {
            DisplayMessage::Decrypted(m) => &m.kind,
            DisplayMessage::Undecryptable { kind, .. } => kind,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            DisplayMessage::Decrypted(m) => m.created_at,
            DisplayMessage::Undecryptable { created_at, .. } => *created_at,
        }
    }

    /// Plaintext, or the placeholder for a message that could not be read.
    pub fn body(&self) -> &str {
        match self {
            DisplayMessage::Decrypted(m) => &m.message,
            DisplayMessage::Undecryptable { .. } => UNDECRYPTABLE_PLACEHOLDER,
        }
    }

    pub fn is_decrypted(&self) -> bool {
        matches!(self, DisplayMessage::Decrypted(_))
    }

    pub(crate) fn set_status(&mut self, new_status: MessageStatus) {
        match self {
            DisplayMessage::Decrypted(m) => m.status = new_status,
            DisplayMessage::Undecryptable { status, .. } => *status = new_status,
        }
    }
}

/// Decrypt `message` for `local_user`, falling back to a placeholder.
pub fn render<C: HybridEncryption>(
    codec: &MessageCodec<C>,
    message: &ChatMessage,
    local_user: UserId,
    private_key: &PrivateKey,
) -> DisplayMessage {
    match codec.decrypt_for_display(message, local_user, private_key) {
        Ok(decrypted) => DisplayMessage::Decrypted(decrypted),
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "message could not be decrypted");
            DisplayMessage::Undecryptable {
                id: message.id,
                sender_id: message.sender_id,
                receiver_id: message.receiver_id,
                is_mine: local_user == message.sender_id,
                status: message.status,
                kind: message.kind.clone(),
                created_at: message.created_at,
                reason: e.to_string(),
            }
        }
    }
}
