//! Per-request branch authorization
//!
//! ```text
//! request(server_user, branch, right)
//!   ├── session is the account owner of server_user → granted (Owner)
//!   ├── session holds a live token covering branch + right → granted (Token)
//!   └── otherwise → AccessDenied
//! ```
//!
//! A [`BranchAccess`] can only be obtained from [`AccessControl::branch`], and
//! every [`BranchStore`](crate::storage::BranchStore) operation requires one,
//! so storage cannot be reached without passing the check first. Nothing is
//! cached: a revoked token stops working on the next request.

use std::fmt;

use tracing::debug;

use super::{AccessRight, AccessStore};
use crate::server::Session;

/// How a request was authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessVia {
    Owner,
    Token(String),
}

/// Proof that a session may exercise `right` on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchAccess {
    server_user: String,
    branch: String,
    right: AccessRight,
    via: AccessVia,
}

impl BranchAccess {
    pub fn server_user(&self) -> &str {
        &self.server_user
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn right(&self) -> AccessRight {
        self.right
    }

    pub fn via(&self) -> &AccessVia {
        &self.via
    }
}

/// The session may not exercise the requested right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDenied {
    pub server_user: String,
    pub branch: String,
    pub right: AccessRight,
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no {} access to branch '{}' of {}",
            self.right, self.branch, self.server_user
        )
    }
}

impl std::error::Error for AccessDenied {}

pub struct AccessControl<'a> {
    session: &'a Session,
    store: &'a AccessStore,
}

impl<'a> AccessControl<'a> {
    pub fn new(session: &'a Session, store: &'a AccessStore) -> Self {
        Self { session, store }
    }

    pub fn branch(
        &self,
        server_user: &str,
        branch: &str,
        right: AccessRight,
    ) -> Result<BranchAccess, AccessDenied> {
        let grant = |via| BranchAccess {
            server_user: server_user.to_string(),
            branch: branch.to_string(),
            right,
            via,
        };

        if self.session.is_account_user(server_user) {
            return Ok(grant(AccessVia::Owner));
        }

        for token_id in self.session.token_ids() {
            if let Some(registered) = self.store.get(server_user, token_id) {
                if registered.token.covers(server_user, branch, right) {
                    debug!(session = %self.session.id(), %branch, %right, "Access granted by token");
                    return Ok(grant(AccessVia::Token(token_id.clone())));
                }
            }
        }

        debug!(session = %self.session.id(), %server_user, %branch, %right, "Access denied");
        Err(AccessDenied {
            server_user: server_user.to_string(),
            branch: branch.to_string(),
            right,
        })
    }

    /// Whether the session may act as the account owner.
    pub fn is_owner(&self, server_user: &str) -> bool {
        self.session.is_account_user(server_user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessRights, AccessToken};
    use crate::crypto::CryptoContext;
    use crate::identity::KeyId;

    fn registered(store: &AccessStore, rights: AccessRights) -> AccessToken {
        let ctx = CryptoContext::new();
        let token = AccessToken::new(&ctx, "alice", "main", rights, KeyId::from_public_key(b"bob"));
        store.register(token.clone(), [0u8; 32]).unwrap();
        token
    }

    #[test]
    fn test_owner_has_full_rights() {
        let store = AccessStore::new();
        let mut session = Session::new();
        session.login("alice");
        let control = AccessControl::new(&session, &store);

        let access = control.branch("alice", "anything", AccessRight::Push).unwrap();
        assert_eq!(access.via(), &AccessVia::Owner);
        assert!(control.branch("bob", "anything", AccessRight::Pull).is_err());
    }

    #[test]
    fn test_token_grants_only_its_rights() {
        let store = AccessStore::new();
        let token = registered(&store, AccessRights::PULL);
        let mut session = Session::new();
        session.grant_token(&token.id);
        let control = AccessControl::new(&session, &store);

        let access = control.branch("alice", "main", AccessRight::Pull).unwrap();
        assert_eq!(access.via(), &AccessVia::Token(token.id.clone()));
        assert!(control.branch("alice", "main", AccessRight::Push).is_err());
        assert!(control.branch("alice", "other", AccessRight::Pull).is_err());
    }

    #[test]
    fn test_no_token_is_denied() {
        let store = AccessStore::new();
        registered(&store, AccessRights::ALL);
        let session = Session::new();
        let denied = AccessControl::new(&session, &store)
            .branch("alice", "main", AccessRight::Pull)
            .unwrap_err();
        assert_eq!(denied.to_string(), "no PULL access to branch 'main' of alice");
    }

    #[test]
    fn test_revocation_is_immediate() {
        let store = AccessStore::new();
        let token = registered(&store, AccessRights::ALL);
        let mut session = Session::new();
        session.grant_token(&token.id);

        assert!(AccessControl::new(&session, &store)
            .branch("alice", "main", AccessRight::Pull)
            .is_ok());
        store.revoke("alice", &token.id);
        assert!(AccessControl::new(&session, &store)
            .branch("alice", "main", AccessRight::Pull)
            .is_err());
    }
}
