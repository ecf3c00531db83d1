//! Server-side registry of issued access tokens

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::AccessToken;
use crate::error::{SyncError, SyncResult};

/// A token plus the grantee's verifying key, used to check access requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredToken {
    pub token: AccessToken,
    pub grantee_key: [u8; 32],
}

/// Tokens per server user, keyed by token id.
#[derive(Debug, Default)]
pub struct AccessStore {
    tokens: RwLock<HashMap<String, HashMap<String, RegisteredToken>>>,
}

impl AccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: AccessToken, grantee_key: [u8; 32]) -> SyncResult<()> {
        let mut tokens = self.tokens.write();
        let user_tokens = tokens.entry(token.server_user.clone()).or_default();
        if user_tokens.contains_key(&token.id) {
            return Err(SyncError::Storage(format!(
                "token {} already registered",
                token.id
            )));
        }
        debug!(
            server_user = %token.server_user,
            branch = %token.branch,
            rights = %token.rights,
            "Access token registered"
        );
        user_tokens.insert(
            token.id.clone(),
            RegisteredToken {
                token,
                grantee_key,
            },
        );
        Ok(())
    }

    pub fn get(&self, server_user: &str, token_id: &str) -> Option<RegisteredToken> {
        self.tokens
            .read()
            .get(server_user)
            .and_then(|user_tokens| user_tokens.get(token_id))
            .cloned()
    }

    /// Remove a token. Sessions holding it lose access on their next request.
    pub fn revoke(&self, server_user: &str, token_id: &str) -> bool {
        let removed = self
            .tokens
            .write()
            .get_mut(server_user)
            .and_then(|user_tokens| user_tokens.remove(token_id))
            .is_some();
        if removed {
            info!(%server_user, %token_id, "Access token revoked");
        }
        removed
    }

    /// Whether a token with this id is registered for any user.
    pub fn contains_id(&self, token_id: &str) -> bool {
        self.tokens
            .read()
            .values()
            .any(|user_tokens| user_tokens.contains_key(token_id))
    }

    pub fn tokens_for(&self, server_user: &str) -> Vec<AccessToken> {
        self.tokens
            .read()
            .get(server_user)
            .map(|user_tokens| user_tokens.values().map(|r| r.token.clone()).collect())
            .unwrap_or_default()
    }
}
