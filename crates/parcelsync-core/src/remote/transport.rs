//! Transport seam and connection descriptors

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::remote::RpcMessage;

/// Names a remote endpoint: the server and the user whose data is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub server_url: String,
    pub server_user: String,
}

impl ConnectionInfo {
    pub fn new(server_url: impl Into<String>, server_user: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            server_user: server_user.into(),
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.server_user, self.server_url)
    }
}

/// How a submission authenticates before its first request.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum AuthInfo {
    None,
    Password { user: String, password: String },
}

impl AuthInfo {
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        AuthInfo::Password {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            AuthInfo::None => None,
            AuthInfo::Password { user, .. } => Some(user),
        }
    }
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthInfo::None => write!(f, "None"),
            AuthInfo::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

/// Blocking request/response exchange.
///
/// `Err` with [`SyncError::Connectivity`](crate::SyncError::Connectivity) or
/// [`SyncError::Framing`](crate::SyncError::Framing) means the exchange itself
/// failed; a well-formed error response is an `Ok` message with an error status.
pub trait Transport: Send + Sync {
    fn send(&self, request: RpcMessage) -> SyncResult<RpcMessage>;
}

/// Opens transport sessions.
pub trait TransportFactory: Send + Sync {
    fn connect(&self, info: &ConnectionInfo) -> SyncResult<Arc<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let auth = AuthInfo::password("alice", "hunter2");
        let debug = format!("{:?}", auth);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_connection_display() {
        let info = ConnectionInfo::new("localhost", "bob");
        assert_eq!(info.to_string(), "bob@localhost");
    }
}
