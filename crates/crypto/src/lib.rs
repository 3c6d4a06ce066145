//! reelchat-crypto: key management and hybrid encryption for ReelChat
//! direct messages.
//!
//! Provides X25519 device keypairs, hybrid X25519/HKDF/AES-256-GCM message
//! encryption, the dual-ciphertext message codec, key fingerprints, and
//! durable key storage (SQLCipher file, OS keychain, or memory).

pub mod codec;
pub mod error;
pub mod fingerprint;
pub mod hybrid;
pub mod keys;
pub mod master_key;
pub mod storage;
