//! Per-connection server session

use std::collections::BTreeSet;

use ulid::Ulid;

/// State the server keeps for one client connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: Ulid,
    account_user: Option<String>,
    tokens: BTreeSet<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Ulid::new(),
            account_user: None,
            tokens: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn account_user(&self) -> Option<&str> {
        self.account_user.as_deref()
    }

    pub fn is_account_user(&self, user: &str) -> bool {
        self.account_user.as_deref() == Some(user)
    }

    pub fn login(&mut self, user: impl Into<String>) {
        self.account_user = Some(user.into());
    }

    pub fn logout(&mut self) {
        self.account_user = None;
    }

    /// Remember a token the client proved possession of.
    pub fn grant_token(&mut self, token_id: impl Into<String>) {
        self.tokens.insert(token_id.into());
    }

    pub fn token_ids(&self) -> impl Iterator<Item = &String> {
        self.tokens.iter()
    }

    pub fn forget_token(&mut self, token_id: &str) -> bool {
        self.tokens.remove(token_id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_logout() {
        let mut session = Session::new();
        assert!(session.account_user().is_none());
        session.login("alice");
        assert!(session.is_account_user("alice"));
        assert!(!session.is_account_user("bob"));
        session.logout();
        assert!(!session.is_account_user("alice"));
    }

    #[test]
    fn test_sessions_have_distinct_ids() {
        assert_ne!(Session::new().id(), Session::new().id());
    }

    #[test]
    fn test_tokens_deduplicate() {
        let mut session = Session::new();
        session.grant_token("t1");
        session.grant_token("t1");
        assert_eq!(session.token_ids().count(), 1);
        assert!(session.forget_token("t1"));
        assert!(!session.forget_token("t1"));
    }
}
