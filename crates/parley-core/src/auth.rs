//! Authentication seam.
//!
//! Token verification lives outside the engine; it only needs to turn a
//! token into a user (or refuse).

use async_trait::async_trait;
use parley_protocol::User;
use std::collections::HashMap;

/// Verifies login tokens.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token to a user, or `None` if the token is rejected.
    async fn verify(&self, token: &str) -> Option<User>;
}

/// Authenticator backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, User>,
}

impl StaticTokenAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user: User) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl FromIterator<(String, User)> for StaticTokenAuthenticator {
    fn from_iter<I: IntoIterator<Item = (String, User)>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn verify(&self, token: &str) -> Option<User> {
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tokens() {
        let auth = StaticTokenAuthenticator::new().with_token("secret", User::new("u1", "alice"));

        assert_eq!(auth.verify("secret").await.unwrap().id, "u1");
        assert!(auth.verify("wrong").await.is_none());
        assert_eq!(auth.len(), 1);
    }
}
