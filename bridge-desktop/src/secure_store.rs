//! Secure Credential Storage using OS Keychain
//!
//! Bearer tokens are UTF-8 and are stored verbatim, so entries written by the
//! host's login flow under the same service are readable as-is. Anything else
//! is stored base64-encoded behind [`BINARY_PREFIX`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::{debug, warn};

/// Keychain service the login flow writes the session token under.
pub const DEFAULT_SERVICE_NAME: &str = "ride-core";

/// Marks an entry holding base64 of non-UTF-8 bytes.
pub const BINARY_PREFIX: &str = "b64:";

/// Keyring-backed [`SecureStore`].
///
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE_NAME)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(|e| keyring_error(key, e))
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

fn keyring_error(key: &str, e: keyring::Error) -> BridgeError {
    BridgeError::OperationFailed(format!("Keyring error for '{}': {}", key, e))
}

fn encode_secret(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text) if !text.starts_with(BINARY_PREFIX) => text.to_string(),
        _ => format!("{}{}", BINARY_PREFIX, STANDARD.encode(value)),
    }
}

fn decode_secret(stored: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    match stored.strip_prefix(BINARY_PREFIX) {
        Some(encoded) => STANDARD.decode(encoded),
        None => Ok(stored.as_bytes().to_vec()),
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entry(key)?
            .set_password(&encode_secret(value))
            .map_err(|e| keyring_error(key, e))?;
        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_password() {
            Ok(stored) => {
                let value = decode_secret(&stored).map_err(|e| {
                    warn!(key = key, error = %e, "Keyring entry is not valid base64");
                    BridgeError::OperationFailed(format!("Corrupt keyring entry '{}': {}", key, e))
                })?;
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(keyring_error(key, e)),
        }
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(key = key, "Deleted secret from keyring");
                Ok(())
            }
            Err(e) => Err(keyring_error(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        assert_eq!(KeyringSecureStore::new().service_name(), DEFAULT_SERVICE_NAME);
        assert_eq!(
            KeyringSecureStore::with_service_name("rider-app").service_name(),
            "rider-app"
        );
    }

    #[test]
    fn test_tokens_are_stored_verbatim() {
        assert_eq!(encode_secret(b"eyJhbGciOiJIUzI1NiJ9.e30.sig"), "eyJhbGciOiJIUzI1NiJ9.e30.sig");
        assert_eq!(decode_secret("plain-token").unwrap(), b"plain-token".to_vec());
    }

    #[test]
    fn test_binary_values_are_prefixed() {
        let raw = [0xff, 0x00, 0x10];
        let stored = encode_secret(&raw);
        assert!(stored.starts_with(BINARY_PREFIX));
        assert_eq!(decode_secret(&stored).unwrap(), raw.to_vec());

        // Text that happens to carry the prefix must not be misread.
        let tricky = encode_secret(b"b64:not-really");
        assert_eq!(decode_secret(&tricky).unwrap(), b"b64:not-really".to_vec());

        assert!(decode_secret("b64:%%%").is_err());
    }

    #[tokio::test]
    async fn test_keyring_round_trip_when_available() {
        let store = KeyringSecureStore::with_service_name("test-ride-core");
        let key = "auth_token_test";

        let _ = store.delete_secret(key).await;

        // Headless CI machines have no secret service
        if let Err(e) = store.set_secret(key, b"session-token").await {
            println!("Keyring not available ({}), skipping test", e);
            return;
        }

        if let Ok(Some(retrieved)) = store.get_secret(key).await {
            assert_eq!(retrieved, b"session-token".to_vec());
        }
        store.delete_secret(key).await.unwrap();
        assert!(!store.has_secret(key).await.unwrap_or(false));
    }
}
