//! Access tokens and rights

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::CryptoContext;
use crate::error::SyncError;
use crate::identity::KeyId;

/// A single right over a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessRight {
    Pull,
    Push,
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRight::Pull => write!(f, "PULL"),
            AccessRight::Push => write!(f, "PUSH"),
        }
    }
}

impl FromStr for AccessRight {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PULL" => Ok(AccessRight::Pull),
            "PUSH" => Ok(AccessRight::Push),
            other => Err(SyncError::Config(format!("unknown access right '{}'", other))),
        }
    }
}

/// Set of rights carried by a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessRights {
    pub pull: bool,
    pub push: bool,
}

impl AccessRights {
    pub const PULL: AccessRights = AccessRights {
        pull: true,
        push: false,
    };
    pub const PUSH: AccessRights = AccessRights {
        pull: false,
        push: true,
    };
    pub const ALL: AccessRights = AccessRights {
        pull: true,
        push: true,
    };

    pub fn covers(&self, right: AccessRight) -> bool {
        match right {
            AccessRight::Pull => self.pull,
            AccessRight::Push => self.push,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.pull && !self.push
    }
}

impl FromIterator<AccessRight> for AccessRights {
    fn from_iter<I: IntoIterator<Item = AccessRight>>(iter: I) -> Self {
        let mut rights = AccessRights::default();
        for right in iter {
            match right {
                AccessRight::Pull => rights.pull = true,
                AccessRight::Push => rights.push = true,
            }
        }
        rights
    }
}

impl fmt::Display for AccessRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.pull, self.push) {
            (true, true) => write!(f, "PULL|PUSH"),
            (true, false) => write!(f, "PULL"),
            (false, true) => write!(f, "PUSH"),
            (false, false) => write!(f, "NONE"),
        }
    }
}

/// Grant binding a contact to rights over one branch of a server user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: String,
    /// Owner of the branch
    pub server_user: String,
    pub branch: String,
    pub rights: AccessRights,
    /// Contact the token was granted to
    pub grantee: KeyId,
    pub issued_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(
        ctx: &CryptoContext,
        server_user: impl Into<String>,
        branch: impl Into<String>,
        rights: AccessRights,
        grantee: KeyId,
    ) -> Self {
        Self {
            id: ctx.random_id(),
            server_user: server_user.into(),
            branch: branch.into(),
            rights,
            grantee,
            issued_at: Utc::now(),
        }
    }

    pub fn covers(&self, server_user: &str, branch: &str, right: AccessRight) -> bool {
        self.server_user == server_user && self.branch == branch && self.rights.covers(right)
    }

    /// Bytes a grantee signs to prove possession of this token.
    pub fn access_proof_data(token_id: &str, server_user: &str) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"parcelsync-access-request");
        for field in [token_id.as_bytes(), server_user.as_bytes()] {
            data.extend_from_slice(&(field.len() as u32).to_le_bytes());
            data.extend_from_slice(field);
        }
        data
    }
}
