//! `ChatSession`: one signed-in user's messaging context.
//!
//! Built once at sign-in after keys are ensured, torn down at sign-out. Key
//! material is loaded once and read-only for the session's lifetime.

use std::sync::Arc;

use chrono::Utc;
use reelchat_crypto::codec::{DecryptedChatMessage, MessageCodec};
use reelchat_crypto::fingerprint::fingerprint;
use reelchat_crypto::keys::{KeyPair, PublicKey};
use reelchat_shared::api::message::{ChatMessage, MessageKind, MessageStatus, StatusPatch};
use reelchat_shared::api::realtime::{MessageEvent, RowEvent, RowOp};
use reelchat_shared::constants::{MAX_MESSAGE_SIZE_BYTES, MESSAGES_TABLE};
use reelchat_shared::ids::{MessageId, UserId};
use serde_json::json;
use tokio::sync::broadcast;

use crate::backend::{Backend, Filter};
use crate::config::ClientConfig;
use crate::delivery::{DeliveryTracker, StatusChange};
use crate::directory::PublicKeyDirectory;
use crate::display::{render, DisplayMessage};
use crate::error::ClientError;
use crate::key_manager::{EnsureOutcome, KeyManager};
use crate::subscription::{ConversationSubscription, ListenerContext, ListenerRegistry};

const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Capacity of each conversation listener's event channel.
    pub event_buffer: usize,
    /// Largest accepted plaintext body, in bytes.
    pub max_message_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            max_message_bytes: MAX_MESSAGE_SIZE_BYTES,
        }
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            event_buffer: config.event_buffer,
            max_message_bytes: config.max_message_bytes,
        }
    }
}

/// Result of re-submitting unacknowledged sends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub confirmed: Vec<MessageId>,
    pub still_pending: Vec<MessageId>,
}

/// Stored history with one peer.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    /// Valid rows, oldest first, decrypted where possible.
    pub messages: Vec<DisplayMessage>,
    /// One error per stored row that failed schema validation.
    pub rejected: Vec<ClientError>,
}

#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    user_id: UserId,
    keys: Arc<KeyPair>,
    codec: Arc<MessageCodec>,
    backend: Arc<dyn Backend>,
    directory: PublicKeyDirectory,
    tracker: Arc<DeliveryTracker>,
    listeners: Arc<ListenerRegistry>,
    options: SessionOptions,
}

impl ChatSession {
    /// Ensure keys for `user_id`, then open a session over the manager's
    /// backend. The outcome tells the caller whether peers can reach this
    /// device yet.
    pub async fn start(
        user_id: UserId,
        key_manager: &KeyManager,
        options: SessionOptions,
    ) -> Result<(Self, EnsureOutcome), ClientError> {
        let outcome = key_manager.ensure_keys_exist(user_id).await?;
        let keys = key_manager.local_keys().await?;
        let directory = key_manager.directory().clone();

        tracing::info!(
            user_id = %user_id,
            outcome = ?outcome,
            "chat session started"
        );

        let session = Self {
            inner: Arc::new(SessionInner {
                user_id,
                keys: Arc::new(keys),
                codec: Arc::new(MessageCodec::new()),
                backend: directory.backend().clone(),
                directory,
                tracker: Arc::new(DeliveryTracker::new()),
                listeners: Arc::new(ListenerRegistry::default()),
                options,
            }),
        };
        Ok((session, outcome))
    }

    pub fn user_id(&self) -> UserId {
        self.inner.user_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.inner.keys.public
    }

    /// Full fingerprint of this device's key, for out-of-band comparison.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.inner.keys.public)
    }

    pub fn status(&self, id: MessageId) -> Option<MessageStatus> {
        self.inner.tracker.status(id)
    }

    pub fn status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.tracker.subscribe()
    }

    pub async fn send_text(
        &self,
        receiver: UserId,
        body: &str,
    ) -> Result<DecryptedChatMessage, ClientError> {
        self.send(receiver, body, MessageKind::Text).await
    }

    /// Encrypt `body` for both participants and store the record.
    ///
    /// Fails with `RecipientKeyMissing` if `receiver` has not published a
    /// key; nothing is stored in that case. If the backend does not
    /// acknowledge the write, the message stays `Sending`, is kept for
    /// [`retry_pending`](Self::retry_pending), and `SendFailed` is returned.
    pub async fn send(
        &self,
        receiver: UserId,
        body: &str,
        kind: MessageKind,
    ) -> Result<DecryptedChatMessage, ClientError> {
        let inner = &self.inner;
        if body.len() > inner.options.max_message_bytes {
            return Err(ClientError::Validation(format!(
                "message body is {} bytes, limit is {}",
                body.len(),
                inner.options.max_message_bytes
            )));
        }
        if kind == MessageKind::Text && body.trim().is_empty() {
            return Err(ClientError::Validation("message body is empty".into()));
        }

        let receiver_key = inner.directory.fetch_key(receiver).await?;
        let copies = inner.codec.encrypt_for_send(
            body.as_bytes(),
            &inner.keys.public,
            receiver_key.as_ref(),
        )?;

        let message = ChatMessage {
            id: MessageId::new(),
            sender_id: inner.user_id,
            receiver_id: receiver,
            sender_copy: copies.sender_copy,
            receiver_copy: copies.receiver_copy,
            status: MessageStatus::Sent,
            kind,
            created_at: Utc::now(),
        };
        inner.tracker.track_outgoing(&message);

        let status = match self.submit(&message).await {
            Ok(()) => {
                inner.tracker.advance_on_server_ack(message.id)?;
                inner.tracker.status(message.id).unwrap_or(MessageStatus::Sent)
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    receiver = %receiver,
                    error = %e,
                    "message send failed, kept for retry"
                );
                return Err(ClientError::SendFailed {
                    message_id: message.id,
                    reason: e.to_string(),
                });
            }
        };

        Ok(DecryptedChatMessage {
            id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            message: body.to_string(),
            status,
            is_mine: true,
            kind: message.kind,
            created_at: message.created_at,
        })
    }

    /// Re-submit every unacknowledged send. Records are upserted by id, so a
    /// retry after a lost acknowledgment never creates a duplicate.
    pub async fn retry_pending(&self) -> RetryReport {
        let mut report = RetryReport::default();
        for message in self.inner.tracker.pending_sends() {
            match self.submit(&message).await {
                Ok(()) => {
                    // Acknowledged by a concurrent path already: nothing to advance.
                    let _ = self.inner.tracker.advance_on_server_ack(message.id);
                    report.confirmed.push(message.id);
                }
                Err(e) => {
                    tracing::debug!(message_id = %message.id, error = %e, "retry failed");
                    report.still_pending.push(message.id);
                }
            }
        }
        report
    }

    /// Stored history with `peer`, oldest first, decrypted for display.
    ///
    /// Rows that fail schema validation are reported in
    /// [`ConversationHistory::rejected`]; they never hide the valid ones.
    pub async fn load_conversation(&self, peer: UserId) -> Result<ConversationHistory, ClientError> {
        let inner = &self.inner;
        let me = json!(inner.user_id);
        let them = json!(peer);
        let filter = Filter::eq("sender_id", me.clone())
            .and(Filter::eq("receiver_id", them.clone()))
            .or(Filter::eq("sender_id", them).and(Filter::eq("receiver_id", me)));

        let rows = inner.backend.query(MESSAGES_TABLE, &filter).await?;
        let mut messages = Vec::with_capacity(rows.len());
        let mut rejected: Vec<ClientError> = Vec::new();
        for record in rows {
            let event = MessageEvent::try_from(RowEvent {
                table: MESSAGES_TABLE.to_string(),
                op: RowOp::Insert,
                record,
            });
            match event {
                Ok(MessageEvent::Inserted(message)) => messages.push(message),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "skipping invalid stored message");
                    rejected.push(e.into());
                }
            }
        }
        messages.sort_by_key(|m| (m.created_at, m.id));

        let messages = messages
            .iter()
            .map(|message| {
                inner.tracker.observe(message);
                let mut shown = render(&*inner.codec, message, inner.user_id, &inner.keys.private);
                if let Some(status) = inner.tracker.status(message.id) {
                    shown.set_status(status);
                }
                shown
            })
            .collect();
        Ok(ConversationHistory { messages, rejected })
    }

    /// Mark a received message read on the server, then locally.
    ///
    /// Returns `false` if it was already read before this call. Only the
    /// receiver may call this; the message must have been loaded or received
    /// in this session.
    pub async fn mark_read(&self, id: MessageId) -> Result<bool, ClientError> {
        let inner = &self.inner;
        let tracked = inner.tracker.get(id).ok_or(ClientError::UnknownMessage(id))?;
        if tracked.receiver_id != inner.user_id {
            return Err(ClientError::NotReceiver);
        }
        if tracked.status == MessageStatus::Read {
            return Ok(false);
        }

        let filter = Filter::eq("id", json!(id)).and(Filter::eq("receiver_id", json!(inner.user_id)));
        let patch = serde_json::to_value(StatusPatch {
            status: MessageStatus::Read,
        })?;
        let updated = inner.backend.update(MESSAGES_TABLE, &filter, patch).await?;
        if updated.is_empty() {
            return Err(ClientError::UnknownMessage(id));
        }

        // A live listener may already have applied the echoed update.
        inner.tracker.advance_on_read(id, inner.user_id)?;
        Ok(true)
    }

    /// Start a live listener for the conversation with `peer`. Any existing
    /// listener for the same peer is torn down first.
    pub async fn open_conversation(
        &self,
        peer: UserId,
    ) -> Result<ConversationSubscription, ClientError> {
        let inner = &self.inner;
        let stream = inner.backend.subscribe(MESSAGES_TABLE).await?;
        Ok(ConversationSubscription::spawn(
            stream,
            ListenerContext {
                me: inner.user_id,
                peer,
                keys: inner.keys.clone(),
                codec: inner.codec.clone(),
                tracker: inner.tracker.clone(),
            },
            inner.options.event_buffer,
            inner.listeners.clone(),
        ))
    }

    pub fn is_listening(&self, peer: UserId) -> bool {
        self.inner.listeners.is_listening(peer)
    }

    /// Stop listening to `peer` and drop settled delivery state for that
    /// conversation. Unacknowledged sends stay queued for retry.
    pub fn close_conversation(&self, peer: UserId) {
        let inner = &self.inner;
        let was_listening = inner.listeners.cancel(peer);
        let forgotten = inner.tracker.forget_conversation(inner.user_id, peer);
        tracing::debug!(peer = %peer, was_listening, forgotten, "conversation closed");
    }

    /// Cancel every live listener. Called at sign-out.
    pub fn shutdown(&self) {
        self.inner.listeners.cancel_all();
        tracing::info!(user_id = %self.inner.user_id, "chat session closed");
    }

    async fn submit(&self, message: &ChatMessage) -> Result<(), ClientError> {
        let record = serde_json::to_value(message)?;
        self.inner.backend.upsert(MESSAGES_TABLE, "id", record).await?;
        Ok(())
    }
}
