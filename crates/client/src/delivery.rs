//! Per-message delivery state: `Sending -> Sent -> Read`.
//!
//! `Sending` exists only on the sending device, between handing a record to
//! the backend and its acknowledgment. Every transition moves strictly
//! forward, so duplicate or out-of-order signals are harmless no-ops.

use dashmap::DashMap;
use reelchat_shared::api::message::{ChatMessage, MessageStatus};
use reelchat_shared::ids::{MessageId, UserId};
use tokio::sync::broadcast;

use crate::error::ClientError;

const STATUS_BROADCAST_CAPACITY: usize = 256;

/// One observed status transition. `from` is `None` the first time a
/// message is seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: MessageId,
    pub from: Option<MessageStatus>,
    pub to: MessageStatus,
}

/// Snapshot of a tracked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedStatus {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub status: MessageStatus,
}

struct Tracked {
    sender_id: UserId,
    receiver_id: UserId,
    status: MessageStatus,
    /// Encrypted record kept until the backend acknowledges it, for retry.
    pending: Option<ChatMessage>,
}

impl Tracked {
    fn advance(&mut self, to: MessageStatus) -> Option<MessageStatus> {
        if to <= self.status {
            return None;
        }
        let from = self.status;
        self.status = to;
        self.pending = None;
        Some(from)
    }

    fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Status of every message seen in this session.
///
/// Entries stay until their conversation is released with
/// [`DeliveryTracker::forget_conversation`] or the session is dropped.
pub struct DeliveryTracker {
    messages: DashMap<MessageId, Tracked>,
    changes: broadcast::Sender<StatusChange>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(STATUS_BROADCAST_CAPACITY);
        Self {
            messages: DashMap::new(),
            changes,
        }
    }

    /// Receive every status transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    pub fn status(&self, id: MessageId) -> Option<MessageStatus> {
        self.messages.get(&id).map(|t| t.status)
    }

    pub fn get(&self, id: MessageId) -> Option<TrackedStatus> {
        self.messages.get(&id).map(|t| TrackedStatus {
            sender_id: t.sender_id,
            receiver_id: t.receiver_id,
            status: t.status,
        })
    }

    /// Start tracking an outgoing message in the local `Sending` state. The
    /// record is retained for retry until acknowledged.
    pub fn track_outgoing(&self, message: &ChatMessage) {
        let inserted = match self.messages.entry(message.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Tracked {
                    sender_id: message.sender_id,
                    receiver_id: message.receiver_id,
                    status: MessageStatus::Sending,
                    pending: Some(message.clone()),
                });
                true
            }
        };
        if inserted {
            self.emit(StatusChange {
                message_id: message.id,
                from: None,
                to: MessageStatus::Sending,
            });
        }
    }

    /// `Sending -> Sent`. Returns whether the status changed.
    pub fn advance_on_server_ack(&self, id: MessageId) -> Result<bool, ClientError> {
        let from = {
            let mut entry = self
                .messages
                .get_mut(&id)
                .ok_or(ClientError::UnknownMessage(id))?;
            entry.advance(MessageStatus::Sent)
        };
        Ok(self.emit_transition(id, from, MessageStatus::Sent))
    }

    /// `-> Read`, only on behalf of the receiver. A read before any ack
    /// collapses `Sending -> Read`. Returns whether the status changed.
    pub fn advance_on_read(&self, id: MessageId, reader: UserId) -> Result<bool, ClientError> {
        let from = {
            let mut entry = self
                .messages
                .get_mut(&id)
                .ok_or(ClientError::UnknownMessage(id))?;
            if entry.receiver_id != reader {
                return Err(ClientError::NotReceiver);
            }
            entry.advance(MessageStatus::Read)
        };
        Ok(self.emit_transition(id, from, MessageStatus::Read))
    }

    /// Merge a stored record's status, tracking it if new.
    pub fn observe(&self, message: &ChatMessage) -> Option<StatusChange> {
        self.observe_status(
            message.id,
            message.sender_id,
            message.receiver_id,
            message.status,
        )
    }

    /// Merge a server-reported status. Never regresses.
    pub fn observe_status(
        &self,
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        status: MessageStatus,
    ) -> Option<StatusChange> {
        let from = match self.messages.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                Some(slot.get_mut().advance(status)?)
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Tracked {
                    sender_id,
                    receiver_id,
                    status,
                    pending: None,
                });
                None
            }
        };
        let change = StatusChange {
            message_id: id,
            from,
            to: status,
        };
        self.emit(change);
        Some(change)
    }

    /// Records handed to the backend but never acknowledged.
    pub fn pending_sends(&self) -> Vec<ChatMessage> {
        let mut pending: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter_map(|entry| entry.pending.clone())
            .collect();
        pending.sort_by_key(|m| (m.created_at, m.id));
        pending
    }

    /// Stop tracking settled messages between `a` and `b`. Unacknowledged
    /// sends are kept so they can still be retried. Returns how many entries
    /// were dropped.
    pub fn forget_conversation(&self, a: UserId, b: UserId) -> usize {
        let mut dropped = 0;
        self.messages.retain(|_, tracked| {
            let keep = tracked.pending.is_some() || !tracked.is_between(a, b);
            if !keep {
                dropped += 1;
            }
            keep
        });
        dropped
    }

    fn emit_transition(&self, id: MessageId, from: Option<MessageStatus>, to: MessageStatus) -> bool {
        match from {
            Some(from) => {
                self.emit(StatusChange {
                    message_id: id,
                    from: Some(from),
                    to,
                });
                true
            }
            None => false,
        }
    }

    fn emit(&self, change: StatusChange) {
        tracing::debug!(
            message_id = %change.message_id,
            from = ?change.from,
            to = ?change.to,
            "message status changed"
        );
        // No receivers just means nobody is watching.
        let _ = self.changes.send(change);
    }
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::new()
    }
}
