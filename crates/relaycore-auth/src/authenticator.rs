//! Owner resolution (spec §6: "an `authenticator` interface the core
//! consumes: `validate-token(token) -> owner`").

use crate::bearer::tokens_match;
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use relaycore_model::OwnerId;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn validate_token(&self, token: &str) -> AuthResult<OwnerId>;
}

/// In-memory reference implementation: a fixed token→owner table, checked
/// with constant-time comparison against every entry so lookup time
/// doesn't leak which prefix of a guessed token is correct.
#[derive(Default)]
pub struct StaticAuthenticator {
    tokens: RwLock<HashMap<String, OwnerId>>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: impl Into<String>, owner: OwnerId) {
        self.tokens.write().await.insert(token.into(), owner);
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn validate_token(&self, token: &str) -> AuthResult<OwnerId> {
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }
        let tokens = self.tokens.read().await;
        let mut found = None;
        for (candidate, owner) in tokens.iter() {
            if tokens_match(candidate, token) {
                found = Some(*owner);
            }
        }
        found.ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_token_to_owner() {
        let auth = StaticAuthenticator::new();
        let owner = OwnerId::new();
        auth.insert("abc123", owner).await;

        assert_eq!(auth.validate_token("abc123").await.unwrap(), owner);
    }

    #[tokio::test]
    async fn rejects_unknown_token() {
        let auth = StaticAuthenticator::new();
        assert!(matches!(auth.validate_token("nope").await, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn rejects_empty_token() {
        let auth = StaticAuthenticator::new();
        assert!(matches!(auth.validate_token("").await, Err(AuthError::EmptyToken)));
    }
}
