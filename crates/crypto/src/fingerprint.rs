//! Public key fingerprints for logging and out-of-band key comparison.
//!
//! A fingerprint is 60 decimal digits derived from SHA-256 of the encoded
//! public key, shown as 12 groups of 5. Logs carry fingerprints, never keys.

use sha2::{Digest, Sha256};

use crate::keys::PublicKey;

const FINGERPRINT_DOMAIN: &[u8] = b"reelchat-key-fingerprint-v1";
/// Number of 5-digit groups in a display fingerprint.
const FINGERPRINT_GROUPS: usize = 12;

/// Human-readable fingerprint: 60 digits formatted as 12 groups of 5.
pub fn fingerprint(key: &PublicKey) -> String {
    let digest = Sha256::new()
        .chain_update(FINGERPRINT_DOMAIN)
        .chain_update(key.as_bytes())
        .finalize();

    // Each group consumes 5 digest bytes as a big-endian integer mod 100000.
    // 12 groups need 60 bytes, so the digest is stretched by re-hashing.
    let stretched = Sha256::new()
        .chain_update(digest)
        .chain_update(FINGERPRINT_DOMAIN)
        .finalize();
    let mut material = Vec::with_capacity(64);
    material.extend_from_slice(&digest);
    material.extend_from_slice(&stretched);

    material
        .chunks_exact(5)
        .take(FINGERPRINT_GROUPS)
        .map(|chunk| {
            let value = chunk.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
            format!("{:05}", value % 100_000)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// First group only. Enough to tell keys apart in log lines.
pub fn short_fingerprint(key: &PublicKey) -> String {
    fingerprint(key)
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn fingerprint_is_60_digits_in_12_groups() {
        let pair = KeyPair::generate().unwrap();
        let fp = fingerprint(&pair.public);

        let groups: Vec<&str> = fp.split(' ').collect();
        assert_eq!(groups.len(), 12);
        assert!(groups.iter().all(|g| g.len() == 5));

        let digits_only: String = fp.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(digits_only.len(), 60);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let pair = KeyPair::generate().unwrap();
        assert_eq!(fingerprint(&pair.public), fingerprint(&pair.public));
    }

    #[test]
    fn different_keys_produce_different_fingerprints() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(fingerprint(&a.public), fingerprint(&b.public));
    }

    #[test]
    fn short_fingerprint_is_first_group() {
        let pair = KeyPair::generate().unwrap();
        let full = fingerprint(&pair.public);
        assert!(full.starts_with(&short_fingerprint(&pair.public)));
        assert_eq!(short_fingerprint(&pair.public).len(), 5);
    }
}
