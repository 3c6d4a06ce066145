//! X25519 key types, their string encoding, and the local keypair record.
//!
//! Keys are 32-byte Curve25519 values encoded as standard base64. The
//! private half is zeroed on drop and never appears in `Debug` output.

use base64::Engine;
use rand::TryRngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::fingerprint;

/// Length of both key halves in bytes.
pub const KEY_LEN: usize = 32;

/// Fill a fixed-size buffer from the OS entropy source.
pub(crate) fn random_bytes<const N: usize>() -> Result<Zeroizing<[u8; N]>, String> {
    let mut buf = Zeroizing::new([0u8; N]);
    rand::rngs::OsRng
        .try_fill_bytes(buf.as_mut())
        .map_err(|e| e.to_string())?;
    Ok(buf)
}

fn decode_key_bytes(encoded: &str, what: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let bytes = Zeroizing::new(
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedKey(format!("{what}: {e}")))?,
    );
    if bytes.len() != KEY_LEN {
        return Err(CryptoError::MalformedKey(format!(
            "{what}: expected {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Public half of a device keypair. The only part ever transmitted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.0.as_bytes()
    }

    pub fn encode(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.as_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_key_bytes(encoded, "public key")?;
        Ok(Self::from_bytes(*bytes))
    }

    /// Constant-time equality, used when comparing against published keys.
    pub fn ct_matches(&self, other: &PublicKey) -> bool {
        self.as_bytes().ct_eq(other.as_bytes()).into()
    }

    pub(crate) fn inner(&self) -> &x25519_dalek::PublicKey {
        &self.0
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublicKey")
            .field(&fingerprint::short_fingerprint(self))
            .finish()
    }
}

/// Private half of a device keypair. Never leaves the originating device.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Encode for local persistence. The returned string is wiped on drop.
    pub fn encode(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.0.to_bytes());
        Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(bytes.as_ref()))
    }

    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = decode_key_bytes(encoded, "private key")?;
        Ok(Self::from_bytes(*bytes))
    }

    pub(crate) fn inner(&self) -> &StaticSecret {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").field(&"[REDACTED]").finish()
    }
}

/// One long-lived keypair per user device.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Result<Self, CryptoError> {
        let seed = random_bytes::<KEY_LEN>().map_err(CryptoError::KeyGenerationFailed)?;
        Ok(Self::from_private(PrivateKey::from_bytes(*seed)))
    }

    pub fn from_private(private: PrivateKey) -> Self {
        Self {
            public: private.public_key(),
            private,
        }
    }

    /// Serialize into the single local key store record.
    pub fn to_record(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let stored = StoredKeyPair {
            public_key: self.public.encode(),
            private_key: self.private.encode().to_string(),
        };
        Ok(Zeroizing::new(serde_json::to_vec(&stored)?))
    }

    /// Parse a key store record. Rejects records whose halves disagree.
    pub fn from_record(bytes: &[u8]) -> Result<Self, CryptoError> {
        let stored: StoredKeyPair = serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::MalformedKey(format!("keypair record: {e}")))?;
        let public = PublicKey::decode(&stored.public_key)?;
        let pair = Self::from_private(PrivateKey::decode(&stored.private_key)?);
        if !pair.public.ct_matches(&public) {
            return Err(CryptoError::MalformedKey(
                "stored public key does not match private key".into(),
            ));
        }
        Ok(pair)
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKeyPair {
    public_key: String,
    private_key: String,
}
