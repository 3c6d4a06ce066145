//! Live conversation listeners.
//!
//! A listener is a spawned task that reads the messages table's change feed,
//! validates each event, keeps only the ones between the local user and one
//! peer, and forwards them over a bounded channel. It lives exactly as long
//! as its [`ConversationSubscription`]: cancelling or dropping the handle
//! aborts the task and releases the feed. At most one listener per peer is
//! active per session, so an insert is never processed twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use reelchat_crypto::codec::MessageCodec;
use reelchat_crypto::keys::KeyPair;
use reelchat_shared::api::message::MessageStatus;
use reelchat_shared::api::realtime::MessageEvent;
use reelchat_shared::ids::{MessageId, UserId};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::backend::RowEventStream;
use crate::delivery::DeliveryTracker;
use crate::display::{render, DisplayMessage};
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A message not seen before in this session.
    Message(DisplayMessage),
    /// A known message moved forward.
    StatusChanged { id: MessageId, status: MessageStatus },
}

pub type ConversationItem = Result<ConversationEvent, ClientError>;

/// Active listeners keyed by peer.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    active: DashMap<UserId, (u64, AbortHandle)>,
    next_token: AtomicU64,
}

impl ListenerRegistry {
    /// Register a listener for `peer`, aborting any previous one.
    fn register(&self, peer: UserId, handle: AbortHandle) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self.active.insert(peer, (token, handle)) {
            tracing::debug!(peer = %peer, "replacing existing conversation listener");
            previous.abort();
        }
        token
    }

    fn release(&self, peer: UserId, token: u64) {
        self.active.remove_if(&peer, |_, (active, _)| *active == token);
    }

    pub(crate) fn is_listening(&self, peer: UserId) -> bool {
        self.active.contains_key(&peer)
    }

    /// Abort the listener for `peer`, if any. Returns whether one was live.
    pub(crate) fn cancel(&self, peer: UserId) -> bool {
        match self.active.remove(&peer) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().1.abort();
        }
        self.active.clear();
    }
}

/// Everything the listener task needs from the session.
pub(crate) struct ListenerContext {
    pub me: UserId,
    pub peer: UserId,
    pub keys: Arc<KeyPair>,
    pub codec: Arc<MessageCodec>,
    pub tracker: Arc<DeliveryTracker>,
}

pub struct ConversationSubscription {
    peer: UserId,
    events: mpsc::Receiver<ConversationItem>,
    task: JoinHandle<()>,
    registry: Arc<ListenerRegistry>,
    token: u64,
}

impl ConversationSubscription {
    pub(crate) fn spawn(
        stream: RowEventStream,
        ctx: ListenerContext,
        buffer: usize,
        registry: Arc<ListenerRegistry>,
    ) -> Self {
        let peer = ctx.peer;
        let (tx, events) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(listen(stream, ctx, tx));
        let token = registry.register(peer, task.abort_handle());
        Self {
            peer,
            events,
            task,
            registry,
            token,
        }
    }

    pub fn peer(&self) -> UserId {
        self.peer
    }

    /// Next event, or `None` once the listener has stopped and the buffer
    /// is drained.
    pub async fn next(&mut self) -> Option<ConversationItem> {
        self.events.recv().await
    }

    /// Stop listening. Events already buffered can still be read.
    pub fn cancel(&mut self) {
        self.task.abort();
        self.registry.release(self.peer, self.token);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ConversationSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn listen(
    mut stream: RowEventStream,
    ctx: ListenerContext,
    tx: mpsc::Sender<ConversationItem>,
) {
    while let Some(raw) = stream.next().await {
        let event = match MessageEvent::try_from(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "rejected malformed realtime event");
                if tx.send(Err(ClientError::InvalidEvent(e.to_string()))).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let (sender, receiver) = event.participants();
        let in_conversation = (sender == ctx.me && receiver == ctx.peer)
            || (sender == ctx.peer && receiver == ctx.me);
        if !in_conversation {
            continue;
        }

        let item = match handle(&ctx, event) {
            Some(item) => item,
            None => continue,
        };
        if tx.send(item).await.is_err() {
            break;
        }
    }
    tracing::debug!(peer = %ctx.peer, "conversation listener stopped");
}

fn handle(ctx: &ListenerContext, event: MessageEvent) -> Option<ConversationItem> {
    match event {
        MessageEvent::Inserted(message) => {
            let change = ctx.tracker.observe(&message)?;
            if change.from.is_some() {
                return Some(Ok(ConversationEvent::StatusChanged {
                    id: message.id,
                    status: change.to,
                }));
            }
            let mut shown = render(&*ctx.codec, &message, ctx.me, &ctx.keys.private);
            if let Some(status) = ctx.tracker.status(message.id) {
                shown.set_status(status);
            }
            Some(Ok(ConversationEvent::Message(shown)))
        }
        MessageEvent::StatusChanged {
            id,
            sender_id,
            receiver_id,
            status,
        } => {
            let changed = if status == MessageStatus::Read {
                match ctx.tracker.advance_on_read(id, receiver_id) {
                    Ok(changed) => changed,
                    Err(ClientError::UnknownMessage(_)) => ctx
                        .tracker
                        .observe_status(id, sender_id, receiver_id, status)
                        .is_some(),
                    Err(e) => return Some(Err(e)),
                }
            } else {
                ctx.tracker
                    .observe_status(id, sender_id, receiver_id, status)
                    .is_some()
            };
            changed.then(|| {
                Ok(ConversationEvent::StatusChanged {
                    id,
                    status: ctx.tracker.status(id).unwrap_or(status),
                })
            })
        }
    }
}
