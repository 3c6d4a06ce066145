use std::sync::Arc;
use std::time::Duration;

use reelchat_client::config::ClientConfig;
use reelchat_client::logging::init_tracing;
use reelchat_client::subscription::ConversationEvent;
use reelchat_client::{ChatSession, KeyManager, MemoryBackend, SessionOptions};
use reelchat_crypto::storage::MemoryKeyStore;
use reelchat_shared::ids::UserId;

/// Two users exchanging one message over an in-process backend. The first
/// user's keys live in the configured key store, the peer's in memory.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ClientConfig::load()?;
    init_tracing(&config.log_level);

    let passphrase = std::env::var("REELCHAT_PASSPHRASE").ok();
    let store = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || config.open_key_store(passphrase.as_deref())).await??
    };

    let backend = Arc::new(MemoryBackend::new());
    let options = SessionOptions::from(&config);

    let alice_keys = KeyManager::new(backend.clone(), store);
    let bob_keys = KeyManager::new(backend.clone(), Arc::new(MemoryKeyStore::new()));
    let (alice, outcome) = ChatSession::start(UserId::new(), &alice_keys, options).await?;
    tracing::info!(user_id = %alice.user_id(), ?outcome, fingerprint = %alice.fingerprint(), "alice ready");
    let (bob, outcome) = ChatSession::start(UserId::new(), &bob_keys, options).await?;
    tracing::info!(user_id = %bob.user_id(), ?outcome, fingerprint = %bob.fingerprint(), "bob ready");

    let mut inbox = bob.open_conversation(alice.user_id()).await?;
    let mut outbox = alice.open_conversation(bob.user_id()).await?;
    let sent = alice.send_text(bob.user_id(), "Hello").await?;
    tracing::info!(message_id = %sent.id, status = ?sent.status, "alice sent a message");

    match tokio::time::timeout(Duration::from_secs(5), inbox.next()).await {
        Ok(Some(Ok(ConversationEvent::Message(shown)))) => {
            tracing::info!(message_id = %shown.id(), body = %shown.body(), "bob received");
            bob.mark_read(shown.id()).await?;
        }
        Ok(Some(Ok(other))) => tracing::warn!(event = ?other, "unexpected event"),
        Ok(Some(Err(e))) => return Err(e.into()),
        Ok(None) | Err(_) => tracing::warn!("no message arrived"),
    }

    if let Ok(Some(Ok(ConversationEvent::StatusChanged { id, status }))) =
        tokio::time::timeout(Duration::from_secs(5), outbox.next()).await
    {
        tracing::info!(message_id = %id, ?status, "alice saw status change");
    }
    tracing::info!(
        message_id = %sent.id,
        status = ?alice.status(sent.id),
        "final delivery status"
    );

    inbox.cancel();
    outbox.cancel();
    alice.shutdown();
    bob.shutdown();
    Ok(())
}
