//! OS keychain-backed key store.
//!
//! Each entry is one keychain credential under the configured service,
//! base64-encoded since keychains store strings.

use base64::Engine;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::storage::KeyStore;

pub struct KeychainKeyStore {
    service: String,
}

impl KeychainKeyStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry, CryptoError> {
        keyring::Entry::new(&self.service, name).map_err(CryptoError::from)
    }
}

impl KeyStore for KeychainKeyStore {
    fn get(&self, name: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        match self.entry(name)?.get_password() {
            Ok(encoded) => {
                let encoded = Zeroizing::new(encoded);
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| CryptoError::KeychainError(format!("corrupt entry {name}: {e}")))?;
                Ok(Some(Zeroizing::new(bytes)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, name: &str, value: &[u8]) -> Result<(), CryptoError> {
        let encoded = Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(value));
        self.entry(name)?.set_password(&encoded)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), CryptoError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_configured_service_name() {
        let store = KeychainKeyStore::new("com.reelchat.test");
        assert_eq!(store.service(), "com.reelchat.test");
    }
}
