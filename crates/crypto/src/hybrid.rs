//! Hybrid encryption of message bodies.
//!
//! Each call draws a fresh AES-256-GCM body key and a fresh 96-bit IV. The
//! body key is wrapped for the recipient with X25519 ECDH against a fresh
//! ephemeral key, HKDF-SHA256, and AES-256-GCM.
//!
//! Wrapped key wire format:
//! ```text
//! [ephemeral_public (32)][wrap_nonce (12)][sealed body key + tag (48)]
//! ```

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use reelchat_shared::api::message::EncryptedPayload;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{random_bytes, KeyPair, PrivateKey, PublicKey, KEY_LEN};

/// 96-bit nonce for AES-256-GCM.
pub const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const WRAPPED_KEY_LEN: usize = KEY_LEN + IV_LEN + KEY_LEN + TAG_LEN;
const WRAP_INFO: &[u8] = b"reelchat-key-wrap-v1";
const BODY_AAD: &[u8] = b"reelchat-body-v1";

/// Stateless hybrid encryption primitive. The seam lets callers count or
/// intercept cipher calls without touching the codec.
pub trait HybridEncryption: Send + Sync {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    fn encrypt(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Result<EncryptedPayload, CryptoError>;

    fn decrypt(
        &self,
        payload: &EncryptedPayload,
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>, CryptoError>;
}

/// X25519 + HKDF-SHA256 + AES-256-GCM.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridCipher;

impl HybridCipher {
    pub fn new() -> Self {
        Self
    }
}

impl HybridEncryption for HybridCipher {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        KeyPair::generate()
    }

    fn encrypt(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> Result<EncryptedPayload, CryptoError> {
        let body_key = random_bytes::<KEY_LEN>().map_err(CryptoError::EncryptionFailed)?;
        let iv = random_bytes::<IV_LEN>().map_err(CryptoError::EncryptionFailed)?;

        let cipher = Aes256Gcm::new_from_slice(body_key.as_ref())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(iv.as_ref()),
                Payload {
                    msg: plaintext,
                    aad: BODY_AAD,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(format!("body: {e}")))?;

        let wrapped_key = wrap_key(&body_key, recipient)?;

        Ok(EncryptedPayload {
            ciphertext,
            wrapped_key,
            iv: iv.to_vec(),
        })
    }

    fn decrypt(
        &self,
        payload: &EncryptedPayload,
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>, CryptoError> {
        if payload.iv.len() != IV_LEN {
            return Err(CryptoError::DecryptionFailed(format!(
                "iv must be {IV_LEN} bytes, got {}",
                payload.iv.len()
            )));
        }

        let body_key = unwrap_key(&payload.wrapped_key, private_key)?;

        let cipher = Aes256Gcm::new_from_slice(body_key.as_ref())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
        cipher
            .decrypt(
                Nonce::from_slice(&payload.iv),
                Payload {
                    msg: &payload.ciphertext,
                    aad: BODY_AAD,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed("body authentication failed".into()))
    }
}

/// Derive the key-encryption key from an ECDH shared secret. Both public
/// keys are bound into the salt.
fn derive_kek(
    shared_secret: &[u8],
    ephemeral_public: &[u8; KEY_LEN],
    recipient_public: &[u8; KEY_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
    let mut salt = [0u8; KEY_LEN * 2];
    salt[..KEY_LEN].copy_from_slice(ephemeral_public);
    salt[KEY_LEN..].copy_from_slice(recipient_public);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut kek = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(WRAP_INFO, kek.as_mut())
        .map_err(|e| e.to_string())?;
    Ok(kek)
}

fn wrap_key(
    body_key: &[u8; KEY_LEN],
    recipient: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let seed = random_bytes::<KEY_LEN>().map_err(CryptoError::EncryptionFailed)?;
    let ephemeral = PrivateKey::from_bytes(*seed);
    let ephemeral_public = ephemeral.public_key();

    let shared = ephemeral.inner().diffie_hellman(recipient.inner());
    if !shared.was_contributory() {
        return Err(CryptoError::MalformedKey(
            "recipient public key is a low-order point".into(),
        ));
    }

    let kek = derive_kek(shared.as_bytes(), ephemeral_public.as_bytes(), recipient.as_bytes())
        .map_err(CryptoError::EncryptionFailed)?;
    let wrap_nonce = random_bytes::<IV_LEN>().map_err(CryptoError::EncryptionFailed)?;

    let cipher = Aes256Gcm::new_from_slice(kek.as_ref())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(wrap_nonce.as_ref()),
            Payload {
                msg: body_key,
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(format!("key wrap: {e}")))?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(wrap_nonce.as_ref());
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn unwrap_key(
    wrapped: &[u8],
    private_key: &PrivateKey,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::DecryptionFailed(format!(
            "wrapped key must be {WRAPPED_KEY_LEN} bytes, got {}",
            wrapped.len()
        )));
    }

    let (ephemeral_bytes, rest) = wrapped.split_at(KEY_LEN);
    let (wrap_nonce, sealed) = rest.split_at(IV_LEN);

    let mut ephemeral_public = [0u8; KEY_LEN];
    ephemeral_public.copy_from_slice(ephemeral_bytes);
    let ephemeral_public = PublicKey::from_bytes(ephemeral_public);

    let shared = private_key.inner().diffie_hellman(ephemeral_public.inner());
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed(
            "ephemeral key is a low-order point".into(),
        ));
    }

    let recipient_public = private_key.public_key();
    let kek = derive_kek(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient_public.as_bytes(),
    )
    .map_err(CryptoError::DecryptionFailed)?;

    let cipher = Aes256Gcm::new_from_slice(kek.as_ref())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    let body_key = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(wrap_nonce),
                Payload {
                    msg: sealed,
                    aad: ephemeral_public.as_bytes(),
                },
            )
            .map_err(|_| {
                CryptoError::DecryptionFailed("private key does not match wrapping key".into())
            })?,
    );

    if body_key.len() != KEY_LEN {
        return Err(CryptoError::DecryptionFailed(
            "unwrapped key has wrong length".into(),
        ));
    }
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&body_key);
    Ok(out)
}
