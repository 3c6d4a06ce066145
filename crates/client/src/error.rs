//! Error types for the reelchat-client crate.

use reelchat_crypto::error::CryptoError;
use reelchat_shared::error::ReelChatError;
use reelchat_shared::ids::MessageId;
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The backend could not be reached or refused the request. The
    /// operation can be retried.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The record was encrypted and kept locally but the backend did not
    /// acknowledge it. The message stays `Sending` until a retry succeeds.
    #[error("send of message {message_id} failed: {reason}")]
    SendFailed { message_id: MessageId, reason: String },

    /// Only the receiver of a message may mark it read.
    #[error("only the receiver can mark a message read")]
    NotReceiver,

    #[error("unknown message: {0}")]
    UnknownMessage(MessageId),

    /// `ensure_keys_exist` has not completed for this device yet.
    #[error("local keys are not initialized")]
    KeysNotInitialized,

    /// A stored row or realtime event failed schema validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::BackendUnavailable(_)
                | ClientError::SendFailed { .. }
                | ClientError::Crypto(CryptoError::RecipientKeyMissing)
        )
    }
}

impl From<BackendError> for ClientError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => ClientError::BackendUnavailable(reason),
            other => ClientError::BackendUnavailable(other.to_string()),
        }
    }
}

impl From<ReelChatError> for ClientError {
    fn from(err: ReelChatError) -> Self {
        ClientError::InvalidEvent(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::InvalidEvent(err.to_string())
    }
}

impl From<ClientError> for ReelChatError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Crypto(e) => e.into(),
            ClientError::BackendUnavailable(reason) | ClientError::SendFailed { reason, .. } => {
                ReelChatError::ServiceUnavailable(reason)
            }
            ClientError::NotReceiver => ReelChatError::Forbidden,
            ClientError::UnknownMessage(_) => ReelChatError::NotFound,
            ClientError::InvalidEvent(reason) | ClientError::Validation(reason) => {
                ReelChatError::Validation(reason)
            }
            other => ReelChatError::Internal(other.to_string()),
        }
    }
}
