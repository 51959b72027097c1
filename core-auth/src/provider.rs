//! Credential provider seam.

use async_trait::async_trait;

use crate::error::Result;

/// Source of the bearer token attached to push handshakes and REST calls.
///
/// `Ok(None)` means "no credential"; callers proceed unauthenticated. An
/// `Err` means the source itself failed, which callers also treat as "no
/// credential" after logging it.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<String>>;
}

/// Fixed credential, for hosts that manage tokens themselves and for tests.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credentials() {
        assert_eq!(
            StaticCredentials::new("tok").bearer_token().await.unwrap(),
            Some("tok".to_string())
        );
        assert_eq!(StaticCredentials::anonymous().bearer_token().await.unwrap(), None);
    }

    #[test]
    fn test_debug_hides_token() {
        let rendered = format!("{:?}", StaticCredentials::new("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }
}
