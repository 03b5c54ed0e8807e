// src/domain/credentials.rs

//! Collaborator seams for server configuration and credentials.
//!
//! The engine never stores either value: the URL is resolved and a fresh
//! token is requested on every connect attempt.

use std::sync::Arc;

use crate::Result;

/// Resolves the hub base URL (e.g. `https://hub.local:8123`).
#[async_trait::async_trait]
pub trait UrlProvider: Send + Sync {
    /// `None` when no server is configured; the connect attempt then fails
    /// without opening a socket.
    async fn hub_url(&self) -> Option<String>;
}

/// Supplies a bearer token for the `auth` frame.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a currently valid access token. Called once per connect attempt.
    async fn access_token(&self) -> Result<String>;
}

pub type UrlProviderPtr = Arc<dyn UrlProvider>;
pub type TokenProviderPtr = Arc<dyn TokenProvider>;

/// Fixed hub URL.
#[derive(Clone, Debug, Default)]
pub struct StaticUrl(pub Option<String>);

impl StaticUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(Some(url.into()))
    }

    /// Provider that reports no configured server.
    pub fn unset() -> Self {
        Self(None)
    }
}

#[async_trait::async_trait]
impl UrlProvider for StaticUrl {
    async fn hub_url(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Fixed access token, e.g. a long-lived token.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_static_providers() {
        // ---
        assert_eq!(
            StaticUrl::new("http://hub:8123").hub_url().await.as_deref(),
            Some("http://hub:8123")
        );
        assert_eq!(StaticUrl::unset().hub_url().await, None);
        assert_eq!(StaticToken::new("abc").access_token().await.unwrap(), "abc");
    }

    #[test]
    fn test_token_is_not_printed() {
        // ---
        let printed = format!("{:?}", StaticToken::new("very-secret"));
        assert!(!printed.contains("very-secret"));
    }
}
