//! Accounts and per-user command inboxes

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::remote::params::CreateAccountParams;
use crate::settings::KdfAlgorithm;

/// What the server knows about an account. Never the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user: String,
    pub salt: Vec<u8>,
    pub kdf: KdfAlgorithm,
    pub kdf_iterations: u32,
    pub password_hash: String,
}

#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, params: CreateAccountParams) -> SyncResult<()> {
        if params.user.is_empty() || params.user.contains('@') {
            return Err(SyncError::Protocol(format!(
                "invalid user name '{}'",
                params.user
            )));
        }
        if params.kdf_iterations == 0 {
            return Err(SyncError::Protocol("kdf iterations must be positive".to_string()));
        }
        let salt = hex::decode(&params.salt)
            .map_err(|e| SyncError::Protocol(format!("salt is not hex: {}", e)))?;

        let mut accounts = self.accounts.write();
        if accounts.contains_key(&params.user) {
            return Err(SyncError::Storage(format!(
                "account '{}' already exists",
                params.user
            )));
        }
        info!(user = %params.user, "Account created");
        accounts.insert(
            params.user.clone(),
            Account {
                user: params.user,
                salt,
                kdf: params.kdf,
                kdf_iterations: params.kdf_iterations,
                password_hash: params.password_hash,
            },
        );
        Ok(())
    }

    pub fn get(&self, user: &str) -> Option<Account> {
        self.accounts.read().get(user).cloned()
    }

    pub fn exists(&self, user: &str) -> bool {
        self.accounts.read().contains_key(user)
    }

    /// Compare password hashes without an early exit on the first differing byte.
    pub fn verify(&self, user: &str, password_hash: &str) -> bool {
        let Some(account) = self.get(user) else {
            return false;
        };
        let expected = blake3::hash(account.password_hash.as_bytes());
        let given = blake3::hash(password_hash.as_bytes());
        expected == given
    }
}

/// Pending enveloped commands per receiver.
#[derive(Debug, Default)]
pub struct InboxStore {
    inboxes: RwLock<HashMap<String, Vec<Bytes>>>,
}

impl InboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, receiver: &str, command: Bytes) {
        let mut inboxes = self.inboxes.write();
        let inbox = inboxes.entry(receiver.to_string()).or_default();
        inbox.push(command);
        debug!(%receiver, pending = inbox.len(), "Command queued");
    }

    /// Remove and return everything queued for `receiver`, oldest first.
    pub fn drain(&self, receiver: &str) -> Vec<Bytes> {
        self.inboxes.write().remove(receiver).unwrap_or_default()
    }

    pub fn pending(&self, receiver: &str) -> usize {
        self.inboxes.read().get(receiver).map(Vec::len).unwrap_or(0)
    }
}
