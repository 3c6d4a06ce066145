//! reelchat-client: the messaging core a UI drives.
//!
//! Wires device keys, the public key directory, the message codec and the
//! delivery state machine to an injected [`Backend`](backend::Backend).
//! Nothing here is global: a [`ChatSession`](session::ChatSession) is built
//! at sign-in and dropped at sign-out.

pub mod backend;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod display;
pub mod error;
pub mod key_manager;
pub mod logging;
pub mod session;
pub mod subscription;

pub use backend::{Backend, MemoryBackend};
pub use error::ClientError;
pub use key_manager::{EnsureOutcome, KeyManager};
pub use session::{ChatSession, ConversationHistory, SessionOptions};
