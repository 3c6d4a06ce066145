use crate::ids::{MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serde helper that encodes `Vec<u8>` fields as standard base64 strings.
pub mod base64_serde {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One hybrid-encrypted copy of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "base64_serde")]
    pub ciphertext: Vec<u8>,
    /// Symmetric key sealed under the recipient's public key.
    #[serde(with = "base64_serde")]
    pub wrapped_key: Vec<u8>,
    #[serde(with = "base64_serde")]
    pub iv: Vec<u8>,
}

/// Delivery status. Ordering follows the lifecycle, so a transition is valid
/// only when it moves to a strictly greater value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Local only: handed to the backend, not yet acknowledged.
    Sending,
    Sent,
    Read,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        self == MessageStatus::Read
    }
}

/// Message type with its clear-text display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image {
        image_url: String,
    },
    MovieReference {
        movie_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        poster_url: Option<String>,
    },
}

/// Wire/storage record for one direct message.
///
/// Both payloads decrypt to the same plaintext: `sender_copy` is sealed under
/// the sender's key so the sender can re-read history, `receiver_copy` under
/// the receiver's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sender_copy: EncryptedPayload,
    pub receiver_copy: EncryptedPayload,
    pub status: MessageStatus,
    #[serde(flatten)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Payload readable by `user_id`, or `None` if they are not a participant.
    pub fn payload_for(&self, user_id: UserId) -> Option<&EncryptedPayload> {
        if user_id == self.sender_id {
            Some(&self.sender_copy)
        } else if user_id == self.receiver_id {
            Some(&self.receiver_copy)
        } else {
            None
        }
    }

    /// True if the message was exchanged between `a` and `b` in either direction.
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Patch body for flipping the server-side status column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusPatch {
    pub status: MessageStatus,
}
