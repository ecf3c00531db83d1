//! Branch storage behind access control
//!
//! Every operation takes a [`BranchAccess`], which only
//! [`AccessControl`](crate::access::AccessControl) can hand out. The store
//! additionally checks that the access carries the right the operation needs.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::access::{AccessRight, BranchAccess};
use crate::error::{SyncError, SyncResult};

/// Latest content of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBranch {
    pub tip: String,
    pub data: Bytes,
}

/// Branch-scoped persistence.
pub trait BranchStore: Send + Sync {
    fn tip(&self, access: &BranchAccess) -> SyncResult<Option<String>>;

    /// Replace the branch content; fails if `expected_tip` is given and stale.
    fn push(&self, access: &BranchAccess, data: Bytes, expected_tip: Option<&str>) -> SyncResult<String>;

    fn pull(&self, access: &BranchAccess) -> SyncResult<Option<StoredBranch>>;
}

/// Tip of a pack: hex BLAKE3 of its bytes.
pub fn tip_of(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

fn require(access: &BranchAccess, right: AccessRight) -> SyncResult<()> {
    if access.right() != right {
        return Err(SyncError::Storage(format!(
            "{} access used for a {} operation on '{}'",
            access.right(),
            right,
            access.branch()
        )));
    }
    Ok(())
}

/// In-memory [`BranchStore`].
#[derive(Debug, Default)]
pub struct MemoryBranchStore {
    branches: RwLock<HashMap<(String, String), StoredBranch>>,
}

impl MemoryBranchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(access: &BranchAccess) -> (String, String) {
        (access.server_user().to_string(), access.branch().to_string())
    }
}

impl BranchStore for MemoryBranchStore {
    fn tip(&self, access: &BranchAccess) -> SyncResult<Option<String>> {
        require(access, AccessRight::Pull)?;
        Ok(self
            .branches
            .read()
            .get(&Self::key(access))
            .map(|branch| branch.tip.clone()))
    }

    fn push(&self, access: &BranchAccess, data: Bytes, expected_tip: Option<&str>) -> SyncResult<String> {
        require(access, AccessRight::Push)?;
        let key = Self::key(access);
        let mut branches = self.branches.write();
        if let Some(expected) = expected_tip {
            let current = branches.get(&key).map(|branch| branch.tip.as_str());
            if current != Some(expected) {
                return Err(SyncError::Storage(format!(
                    "branch '{}' moved: expected tip {}, found {}",
                    access.branch(),
                    expected,
                    current.unwrap_or("none")
                )));
            }
        }
        let tip = tip_of(&data);
        debug!(
            server_user = %access.server_user(),
            branch = %access.branch(),
            %tip,
            size = data.len(),
            "Branch updated"
        );
        branches.insert(
            key,
            StoredBranch {
                tip: tip.clone(),
                data,
            },
        );
        Ok(tip)
    }

    fn pull(&self, access: &BranchAccess) -> SyncResult<Option<StoredBranch>> {
        require(access, AccessRight::Pull)?;
        Ok(self.branches.read().get(&Self::key(access)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessControl, AccessStore};
    use crate::server::Session;

    fn owner_access(right: AccessRight) -> BranchAccess {
        let mut session = Session::new();
        session.login("alice");
        let tokens = AccessStore::new();
        AccessControl::new(&session, &tokens)
            .branch("alice", "main", right)
            .unwrap()
    }

    #[test]
    fn test_push_then_pull() {
        let store = MemoryBranchStore::new();
        let push = owner_access(AccessRight::Push);
        let pull = owner_access(AccessRight::Pull);

        assert!(store.pull(&pull).unwrap().is_none());
        let tip = store.push(&push, Bytes::from_static(b"v1"), None).unwrap();
        assert_eq!(tip, tip_of(b"v1"));
        assert_eq!(store.tip(&pull).unwrap(), Some(tip.clone()));
        let stored = store.pull(&pull).unwrap().unwrap();
        assert_eq!(stored.data, Bytes::from_static(b"v1"));
        assert_eq!(stored.tip, tip);
    }

    #[test]
    fn test_stale_expected_tip_rejected() {
        let store = MemoryBranchStore::new();
        let push = owner_access(AccessRight::Push);
        let first = store.push(&push, Bytes::from_static(b"v1"), None).unwrap();
        store.push(&push, Bytes::from_static(b"v2"), Some(&first)).unwrap();
        assert!(store.push(&push, Bytes::from_static(b"v3"), Some(&first)).is_err());
    }

    #[test]
    fn test_right_must_match_operation() {
        let store = MemoryBranchStore::new();
        let pull = owner_access(AccessRight::Pull);
        assert!(matches!(
            store.push(&pull, Bytes::from_static(b"v1"), None),
            Err(SyncError::Storage(_))
        ));
        let push = owner_access(AccessRight::Push);
        assert!(store.pull(&push).is_err());
    }
}
