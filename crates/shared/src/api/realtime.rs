//! Realtime row-change schema.
//!
//! The backend delivers loosely typed `RowEvent`s. `MessageEvent::try_from`
//! validates them at the deserialization boundary and rejects anything that
//! does not fit the messages table schema.

use crate::api::message::{ChatMessage, MessageStatus};
use crate::constants::MESSAGES_TABLE;
use crate::error::ReelChatError;
use crate::ids::{MessageId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOp {
    Insert,
    Update,
}

/// A raw change notification for one row, as emitted by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEvent {
    pub table: String,
    pub op: RowOp,
    pub record: serde_json::Value,
}

/// Typed change on the messages table.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Inserted(ChatMessage),
    StatusChanged {
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        status: MessageStatus,
    },
}

#[derive(Deserialize)]
struct StatusRow {
    id: MessageId,
    sender_id: UserId,
    receiver_id: UserId,
    status: MessageStatus,
}

impl MessageEvent {
    pub fn message_id(&self) -> MessageId {
        match self {
            MessageEvent::Inserted(msg) => msg.id,
            MessageEvent::StatusChanged { id, .. } => *id,
        }
    }

    pub fn participants(&self) -> (UserId, UserId) {
        match self {
            MessageEvent::Inserted(msg) => (msg.sender_id, msg.receiver_id),
            MessageEvent::StatusChanged {
                sender_id,
                receiver_id,
                ..
            } => (*sender_id, *receiver_id),
        }
    }
}

impl TryFrom<RowEvent> for MessageEvent {
    type Error = ReelChatError;

    fn try_from(event: RowEvent) -> Result<Self, Self::Error> {
        if event.table != MESSAGES_TABLE {
            return Err(ReelChatError::Validation(format!(
                "event for unexpected table: {}",
                event.table
            )));
        }

        match event.op {
            RowOp::Insert => {
                let msg: ChatMessage = serde_json::from_value(event.record)
                    .map_err(|e| ReelChatError::Validation(format!("malformed message row: {e}")))?;
                if msg.status == MessageStatus::Sending {
                    return Err(ReelChatError::Validation(
                        "stored message cannot be in sending state".into(),
                    ));
                }
                Ok(MessageEvent::Inserted(msg))
            }
            RowOp::Update => {
                let row: StatusRow = serde_json::from_value(event.record)
                    .map_err(|e| ReelChatError::Validation(format!("malformed status row: {e}")))?;
                if row.status == MessageStatus::Sending {
                    return Err(ReelChatError::Validation(
                        "stored message cannot be in sending state".into(),
                    ));
                }
                Ok(MessageEvent::StatusChanged {
                    id: row.id,
                    sender_id: row.sender_id,
                    receiver_id: row.receiver_id,
                    status: row.status,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::message::{EncryptedPayload, MessageKind};

    fn sample_row() -> serde_json::Value {
        let payload = EncryptedPayload {
            ciphertext: vec![1],
            wrapped_key: vec![2],
            iv: vec![3],
        };
        serde_json::to_value(ChatMessage {
            id: MessageId::new(),
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            sender_copy: payload.clone(),
            receiver_copy: payload,
            status: MessageStatus::Sent,
            kind: MessageKind::Text,
            created_at: chrono::Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn insert_event_parses_full_row() {
        let record = sample_row();
        let event = RowEvent {
            table: MESSAGES_TABLE.into(),
            op: RowOp::Insert,
            record: record.clone(),
        };
        match MessageEvent::try_from(event).unwrap() {
            MessageEvent::Inserted(msg) => {
                assert_eq!(serde_json::to_value(&msg).unwrap(), record);
            }
            other => panic!("expected Inserted, got: {other:?}"),
        }
    }

    #[test]
    fn update_event_needs_only_status_columns() {
        let id = MessageId::new();
        let event = RowEvent {
            table: MESSAGES_TABLE.into(),
            op: RowOp::Update,
            record: serde_json::json!({
                "id": id,
                "sender_id": UserId::new(),
                "receiver_id": UserId::new(),
                "status": "read",
            }),
        };
        let parsed = MessageEvent::try_from(event).unwrap();
        assert_eq!(parsed.message_id(), id);
        assert!(matches!(
            parsed,
            MessageEvent::StatusChanged {
                status: MessageStatus::Read,
                ..
            }
        ));
    }

    #[test]
    fn malformed_row_is_rejected_not_dropped() {
        let event = RowEvent {
            table: MESSAGES_TABLE.into(),
            op: RowOp::Insert,
            record: serde_json::json!({ "id": "not-a-uuid" }),
        };
        assert!(matches!(
            MessageEvent::try_from(event),
            Err(ReelChatError::Validation(_))
        ));
    }

    #[test]
    fn wrong_table_is_rejected() {
        let event = RowEvent {
            table: "user_public_keys".into(),
            op: RowOp::Insert,
            record: sample_row(),
        };
        assert!(MessageEvent::try_from(event).is_err());
    }

    #[test]
    fn sending_status_on_the_wire_is_rejected() {
        let mut record = sample_row();
        record["status"] = serde_json::json!("sending");
        let event = RowEvent {
            table: MESSAGES_TABLE.into(),
            op: RowOp::Insert,
            record,
        };
        assert!(MessageEvent::try_from(event).is_err());
    }
}
