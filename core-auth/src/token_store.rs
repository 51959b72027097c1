//! Session Token Storage
//!
//! Reads the bearer token persisted by the login flow from platform secure
//! storage (Keychain, Keystore, etc.).
//!
//! ## Security Features
//!
//! - Tokens are never logged or exposed in error messages
//! - Storage uses platform-specific secure stores (via `SecureStore` trait)
//! - Unreadable entries are erased so the next login starts clean
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{CredentialProvider, SessionTokenStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let token_store = SessionTokenStore::new(secure_store, "auth_token");
//!
//! if let Some(token) = token_store.bearer_token().await? {
//!     // attach to the push handshake
//! #   let _ = token;
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::provider::CredentialProvider;
use async_trait::async_trait;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bearer token persisted under a single secure store key.
///
/// Values are stored as UTF-8. Hosts that persist through a JSON key-value
/// layer may leave the token wrapped in quotes; those are unwrapped on read.
#[derive(Clone)]
pub struct SessionTokenStore {
    secure_store: Arc<dyn SecureStore>,
    key: String,
}

impl SessionTokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        debug!(key = %key, "Initializing SessionTokenStore");
        Self { secure_store, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the stored token.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(token))` if a non-empty token is stored
    /// - `Ok(None)` if nothing (or only whitespace) is stored
    /// - `Err(TokenCorrupted)` if the value is not UTF-8; the entry is erased
    /// - `Err(SecureStorageUnavailable)` if the store failed
    pub async fn load_token(&self) -> Result<Option<String>> {
        let data = self.secure_store.get_secret(&self.key).await.map_err(|e| {
            warn!(key = %self.key, error = %e, "Failed to read token from secure storage");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(key = %self.key, "No session token stored");
            return Ok(None);
        };

        let raw = match String::from_utf8(data) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.key, "Stored session token is not UTF-8, erasing");
                if let Err(delete_err) = self.secure_store.delete_secret(&self.key).await {
                    warn!(key = %self.key, error = %delete_err, "Failed to erase corrupted token");
                }
                return Err(AuthError::TokenCorrupted {
                    key: self.key.clone(),
                    reason: e.to_string(),
                });
            }
        };

        Ok(normalize_token(&raw))
    }

    /// Persist a token, replacing any previous value.
    pub async fn store_token(&self, token: &str) -> Result<()> {
        self.secure_store
            .set_secret(&self.key, token.as_bytes())
            .await
            .map_err(|e| {
                warn!(key = %self.key, error = %e, "Failed to store session token");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(key = %self.key, "Session token stored securely");
        Ok(())
    }

    /// Erase the token. Succeeds when nothing is stored.
    pub async fn clear_token(&self) -> Result<()> {
        self.secure_store
            .delete_secret(&self.key)
            .await
            .map_err(|e| {
                warn!(key = %self.key, error = %e, "Failed to erase session token");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(key = %self.key, "Session token erased");
        Ok(())
    }

    pub async fn has_token(&self) -> Result<bool> {
        Ok(self.load_token().await?.is_some())
    }
}

impl std::fmt::Debug for SessionTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenStore")
            .field("key", &self.key)
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for SessionTokenStore {
    async fn bearer_token(&self) -> Result<Option<String>> {
        self.load_token().await
    }
}

fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = match serde_json::from_str::<String>(trimmed) {
        Ok(inner) if trimmed.starts_with('"') => inner,
        _ => trimmed.to_string(),
    };
    let unquoted = unquoted.trim();
    if unquoted.is_empty() || unquoted == "null" {
        None
    } else {
        Some(unquoted.to_string())
    }
}
