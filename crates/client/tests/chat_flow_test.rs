//! Two sessions talking through one in-memory backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reelchat_client::backend::{Backend, BackendError, Filter, MemoryBackend, RowEventStream};
use reelchat_client::delivery::StatusChange;
use reelchat_client::error::ClientError;
use reelchat_client::key_manager::{EnsureOutcome, KeyManager};
use reelchat_client::session::{ChatSession, SessionOptions};
use reelchat_client::subscription::{ConversationEvent, ConversationSubscription};
use reelchat_crypto::error::CryptoError;
use reelchat_crypto::storage::{KeyStore, MemoryKeyStore};
use reelchat_shared::api::message::{MessageKind, MessageStatus};
use reelchat_shared::api::realtime::{RowEvent, RowOp};
use reelchat_shared::constants::{KEYPAIR_ENTRY_NAME, MESSAGES_TABLE, UNDECRYPTABLE_PLACEHOLDER};
use reelchat_shared::ids::{MessageId, UserId};
use serde_json::json;

struct Device {
    session: ChatSession,
    manager: KeyManager,
    store: Arc<MemoryKeyStore>,
}

async fn device(backend: &Arc<MemoryBackend>, user: UserId) -> Device {
    let store = Arc::new(MemoryKeyStore::new());
    let manager = KeyManager::new(backend.clone(), store.clone());
    let (session, outcome) = ChatSession::start(user, &manager, SessionOptions::default())
        .await
        .unwrap();
    assert!(outcome.is_published());
    Device {
        session,
        manager,
        store,
    }
}

async fn next_event(sub: &mut ConversationSubscription) -> ConversationEvent {
    tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("timed out waiting for conversation event")
        .expect("subscription closed")
        .expect("listener reported an error")
}

#[tokio::test]
async fn alice_sends_hello_and_bob_reads_it() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;
    let bob = device(&backend, UserId::new()).await;
    let (a, b) = (alice.session.user_id(), bob.session.user_id());

    let mut alice_view = alice.session.open_conversation(b).await.unwrap();
    let mut bob_view = bob.session.open_conversation(a).await.unwrap();

    let sent = alice.session.send_text(b, "Hello").await.unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);

    match next_event(&mut bob_view).await {
        ConversationEvent::Message(shown) => {
            assert_eq!(shown.id(), sent.id);
            assert_eq!(shown.body(), "Hello");
            assert!(!shown.is_mine());
            assert_eq!(shown.status(), MessageStatus::Sent);
        }
        other => panic!("expected message, got: {other:?}"),
    }

    assert!(bob.session.mark_read(sent.id).await.unwrap());

    // Alice's own insert echo is already known, so the first event is the read.
    assert_eq!(
        next_event(&mut alice_view).await,
        ConversationEvent::StatusChanged {
            id: sent.id,
            status: MessageStatus::Read
        }
    );
    assert_eq!(alice.session.status(sent.id), Some(MessageStatus::Read));

    // Both sides can re-read the history from their own copy.
    let alice_history = alice.session.load_conversation(b).await.unwrap().messages;
    let bob_history = bob.session.load_conversation(a).await.unwrap().messages;
    assert_eq!(alice_history.len(), 1);
    assert_eq!(alice_history[0].body(), "Hello");
    assert!(alice_history[0].is_mine());
    assert_eq!(bob_history[0].body(), "Hello");
    assert_eq!(bob_history[0].status(), MessageStatus::Read);
}

#[tokio::test]
async fn send_to_user_without_key_creates_no_record() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;
    let never_signed_in = UserId::new();

    let err = alice
        .session
        .send_text(never_signed_in, "Hello")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Crypto(CryptoError::RecipientKeyMissing)));
    assert!(err.is_retryable());
    assert!(backend.rows(MESSAGES_TABLE).is_empty());

    // Once the peer publishes, the same send goes through.
    let late = device(&backend, never_signed_in).await;
    alice.session.send_text(late.session.user_id(), "Hello").await.unwrap();
    assert_eq!(backend.rows(MESSAGES_TABLE).len(), 1);
}

#[tokio::test]
async fn ensure_keys_is_idempotent_across_sessions() {
    let backend = Arc::new(MemoryBackend::new());
    let user = UserId::new();
    let first = device(&backend, user).await;
    let key = first.session.public_key();

    let outcome = first.manager.ensure_keys_exist(user).await.unwrap();
    assert_eq!(outcome, EnsureOutcome::AlreadyPublished);

    let (again, outcome) = ChatSession::start(user, &first.manager, SessionOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome, EnsureOutcome::AlreadyPublished);
    assert!(again.public_key().ct_matches(&key));
    assert_eq!(again.fingerprint(), first.session.fingerprint());
}

#[tokio::test]
async fn failed_send_stays_sending_and_retry_confirms_once() {
    let backend = Arc::new(MemoryBackend::new());
    let bob = device(&backend, UserId::new()).await;
    let b = bob.session.user_id();

    // Alice's device talks through a link that can drop writes while reads
    // still work, so the key lookup succeeds and the upsert fails.
    let flaky = Arc::new(FlakyWrites::new(backend.clone()));
    let manager = KeyManager::new(flaky.clone(), Arc::new(MemoryKeyStore::new()));
    let (alice, _) = ChatSession::start(UserId::new(), &manager, SessionOptions::default())
        .await
        .unwrap();
    let mut changes = alice.status_changes();

    flaky.fail_writes(true);
    let err = alice.send_text(b, "are you there?").await.unwrap_err();
    assert!(err.is_retryable());
    let id = match err {
        ClientError::SendFailed { message_id, .. } => message_id,
        other => panic!("expected SendFailed, got: {other:?}"),
    };
    assert_eq!(alice.status(id), Some(MessageStatus::Sending));

    let report = alice.retry_pending().await;
    assert_eq!(report.still_pending, vec![id]);

    flaky.fail_writes(false);
    let report = alice.retry_pending().await;
    assert_eq!(report.confirmed, vec![id]);
    assert_eq!(alice.status(id), Some(MessageStatus::Sent));
    assert!(alice.retry_pending().await.confirmed.is_empty());

    let mut seen = Vec::new();
    while let Ok(StatusChange { message_id, to, .. }) = changes.try_recv() {
        if message_id == id {
            seen.push(to);
        }
    }
    assert_eq!(seen, vec![MessageStatus::Sending, MessageStatus::Sent]);
    assert_eq!(backend.rows(MESSAGES_TABLE).len(), 1);

    let history = bob.session.load_conversation(alice.user_id()).await.unwrap().messages;
    assert_eq!(history[0].body(), "are you there?");
}

#[tokio::test]
async fn lost_local_keys_leave_old_history_undecryptable() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;
    let bob = device(&backend, UserId::new()).await;
    let (a, b) = (alice.session.user_id(), bob.session.user_id());
    alice.session.send_text(b, "before reinstall").await.unwrap();

    alice.store.delete(KEYPAIR_ENTRY_NAME).unwrap();
    let (reinstalled, outcome) = ChatSession::start(a, &alice.manager, SessionOptions::default())
        .await
        .unwrap();
    match outcome {
        EnsureOutcome::Regenerated {
            orphaned_previous_key,
            published,
        } => {
            assert!(orphaned_previous_key.ct_matches(&alice.session.public_key()));
            assert!(published);
        }
        other => panic!("expected Regenerated, got: {other:?}"),
    }

    let history = reinstalled.load_conversation(b).await.unwrap().messages;
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_decrypted());
    assert_eq!(history[0].body(), UNDECRYPTABLE_PLACEHOLDER);

    // Bob still reads his copy, and new messages work with the new key.
    assert_eq!(
        bob.session.load_conversation(a).await.unwrap().messages[0].body(),
        "before reinstall"
    );
    bob.session.send_text(a, "welcome back").await.unwrap();
    let history = reinstalled.load_conversation(b).await.unwrap().messages;
    assert_eq!(history[1].body(), "welcome back");
}

#[tokio::test]
async fn malformed_stored_row_is_rejected_without_hiding_history() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;
    let bob = device(&backend, UserId::new()).await;
    let (a, b) = (alice.session.user_id(), bob.session.user_id());

    for text in ["one", "two", "three"] {
        alice.session.send_text(b, text).await.unwrap();
    }
    backend
        .insert(
            MESSAGES_TABLE,
            json!({
                "id": MessageId::new(),
                "sender_id": a,
                "receiver_id": b,
                "status": "sent",
            }),
        )
        .await
        .unwrap();

    let history = bob.session.load_conversation(a).await.unwrap();
    let bodies: Vec<&str> = history.messages.iter().map(|m| m.body()).collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    assert_eq!(history.rejected.len(), 1);
    assert!(matches!(history.rejected[0], ClientError::InvalidEvent(_)));
}

#[tokio::test]
async fn malformed_realtime_event_is_surfaced_not_dropped() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;
    let mut view = alice.session.open_conversation(UserId::new()).await.unwrap();

    backend.emit_raw(RowEvent {
        table: MESSAGES_TABLE.into(),
        op: RowOp::Update,
        record: json!({ "status": "sending" }),
    });
    let item = tokio::time::timeout(Duration::from_secs(2), view.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(item, Err(ClientError::InvalidEvent(_))));
}

#[tokio::test]
async fn shutdown_cancels_listeners() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;
    let peer = UserId::new();
    let mut view = alice.session.open_conversation(peer).await.unwrap();
    assert!(alice.session.is_listening(peer));

    alice.session.shutdown();
    assert!(!alice.session.is_listening(peer));
    let closed = tokio::time::timeout(Duration::from_secs(2), view.next())
        .await
        .unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn movie_reference_metadata_travels_in_clear() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;
    let bob = device(&backend, UserId::new()).await;

    let kind = MessageKind::MovieReference {
        movie_id: 603,
        poster_url: Some("https://img.example/603.jpg".into()),
    };
    alice
        .session
        .send(bob.session.user_id(), "watch this", kind.clone())
        .await
        .unwrap();

    let rows = backend.rows(MESSAGES_TABLE);
    assert_eq!(rows[0]["message_type"], "movie_reference");
    assert_eq!(rows[0]["movie_id"], 603);

    let history = bob.session.load_conversation(alice.session.user_id()).await.unwrap().messages;
    assert_eq!(history[0].kind(), &kind);
    assert_eq!(history[0].body(), "watch this");
}

#[tokio::test]
async fn key_loss_is_reported_even_when_republish_fails() {
    let backend = Arc::new(MemoryBackend::new());
    let flaky = Arc::new(FlakyWrites::new(backend.clone()));
    let store = Arc::new(MemoryKeyStore::new());
    let manager = KeyManager::new(flaky.clone(), store.clone());
    let user = UserId::new();

    manager.ensure_keys_exist(user).await.unwrap();
    let old = manager.local_keys().await.unwrap();
    store.delete(KEYPAIR_ENTRY_NAME).unwrap();

    flaky.fail_writes(true);
    let outcome = manager.ensure_keys_exist(user).await.unwrap();
    match &outcome {
        EnsureOutcome::Regenerated {
            orphaned_previous_key,
            published,
        } => {
            assert!(orphaned_previous_key.ct_matches(&old.public));
            assert!(!published);
        }
        other => panic!("expected Regenerated, got: {other:?}"),
    }
    assert!(!outcome.is_published());

    // The directory still serves the old key until the new one goes out.
    flaky.fail_writes(false);
    assert_eq!(
        manager.ensure_keys_exist(user).await.unwrap(),
        EnsureOutcome::ServerKeyMismatch
    );
    let new = manager.local_keys().await.unwrap();
    assert!(!new.public.ct_matches(&old.public));
    assert!(manager
        .directory()
        .fetch_key(user)
        .await
        .unwrap()
        .unwrap()
        .ct_matches(&new.public));
}

#[tokio::test]
async fn mark_read_reports_the_read_when_own_listener_applies_it_first() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = device(&backend, UserId::new()).await;

    let flaky = Arc::new(FlakyWrites::new(backend.clone()));
    let manager = KeyManager::new(flaky.clone(), Arc::new(MemoryKeyStore::new()));
    let (bob, _) = ChatSession::start(UserId::new(), &manager, SessionOptions::default())
        .await
        .unwrap();
    let mut bob_view = bob.open_conversation(alice.session.user_id()).await.unwrap();

    let sent = alice.session.send_text(bob.user_id(), "Hello").await.unwrap();
    assert!(matches!(next_event(&mut bob_view).await, ConversationEvent::Message(_)));

    // Hold mark_read after the server update so the listener sees the echo first.
    flaky.pause_after_update(true);
    assert!(bob.mark_read(sent.id).await.unwrap());
    assert_eq!(
        next_event(&mut bob_view).await,
        ConversationEvent::StatusChanged {
            id: sent.id,
            status: MessageStatus::Read
        }
    );
    assert_eq!(bob.status(sent.id), Some(MessageStatus::Read));
    assert!(!bob.mark_read(sent.id).await.unwrap());
}

#[tokio::test]
async fn closing_a_conversation_keeps_unacknowledged_sends() {
    let backend = Arc::new(MemoryBackend::new());
    let bob = device(&backend, UserId::new()).await;
    let b = bob.session.user_id();

    let flaky = Arc::new(FlakyWrites::new(backend.clone()));
    let manager = KeyManager::new(flaky.clone(), Arc::new(MemoryKeyStore::new()));
    let (alice, _) = ChatSession::start(UserId::new(), &manager, SessionOptions::default())
        .await
        .unwrap();
    let _view = alice.open_conversation(b).await.unwrap();

    let delivered = alice.send_text(b, "first").await.unwrap();
    flaky.fail_writes(true);
    assert!(alice.send_text(b, "second").await.is_err());
    flaky.fail_writes(false);

    alice.close_conversation(b);
    assert!(!alice.is_listening(b));
    assert_eq!(alice.status(delivered.id), None);

    let report = alice.retry_pending().await;
    assert_eq!(report.confirmed.len(), 1);
    let bodies: Vec<String> = bob
        .session
        .load_conversation(alice.user_id())
        .await
        .unwrap()
        .messages
        .iter()
        .map(|m| m.body().to_string())
        .collect();
    assert_eq!(bodies, vec!["first", "second"]);
}

/// Delegates to a real backend but can refuse writes on demand.
struct FlakyWrites {
    inner: Arc<MemoryBackend>,
    failing: AtomicBool,
    pause_after_update: AtomicBool,
}

impl FlakyWrites {
    fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            pause_after_update: AtomicBool::new(false),
        }
    }

    fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    fn pause_after_update(&self, pause: bool) {
        self.pause_after_update.store(pause, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("write dropped".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl Backend for FlakyWrites {
    async fn insert(
        &self,
        table: &str,
        record: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError> {
        self.check()?;
        self.inner.insert(table, record).await
    }

    async fn upsert(
        &self,
        table: &str,
        conflict_column: &str,
        record: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError> {
        self.check()?;
        self.inner.upsert(table, conflict_column, record).await
    }

    async fn query(
        &self,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.inner.query(table, filter).await
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: serde_json::Value,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.check()?;
        let updated = self.inner.update(table, filter, patch).await?;
        if self.pause_after_update.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(updated)
    }

    async fn subscribe(
        &self,
        table: &str,
    ) -> Result<RowEventStream, BackendError>
    {
        self.inner.subscribe(table).await
    }
}
