//! Request dispatch
//!
//! ```text
//! RpcMessage ──parse──► RpcRequest ──method──► RequestHandler ──► Reply ──► RpcMessage
//!               │                     │
//!               └─ "invalid request"  └─ "no handler for request"
//! ```
//!
//! Handlers return `Err` for malformed parameters or backend failures; the
//! portal turns those into `ERROR` responses. Before dispatch, tokens revoked
//! since the last request are dropped from the session and reported in the
//! response's out-of-band `error` field.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{handlers, AccountStore, InboxStore, Session};
use crate::access::AccessStore;
use crate::crypto::CryptoContext;
use crate::error::{SyncError, SyncResult};
use crate::remote::{JobStatus, RpcMessage, RpcRequest, RpcResponse};
use crate::storage::{BranchStore, MemoryBranchStore};

/// Everything handlers can touch.
pub struct ServerState {
    pub crypto: CryptoContext,
    pub accounts: AccountStore,
    pub inboxes: InboxStore,
    pub tokens: AccessStore,
    pub branches: Arc<dyn BranchStore>,
}

impl ServerState {
    pub fn new(crypto: CryptoContext) -> Self {
        Self::with_branch_store(crypto, Arc::new(MemoryBranchStore::new()))
    }

    pub fn with_branch_store(crypto: CryptoContext, branches: Arc<dyn BranchStore>) -> Self {
        Self {
            crypto,
            accounts: AccountStore::new(),
            inboxes: InboxStore::new(),
            tokens: AccessStore::new(),
            branches,
        }
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState").finish_non_exhaustive()
    }
}

/// A handler's answer. The portal fills in the request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: JobStatus,
    pub message: String,
    pub result: Value,
    pub data: Option<Bytes>,
}

impl Reply {
    pub fn new(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            result: Value::Null,
            data: None,
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(JobStatus::Done, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(JobStatus::Error, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(JobStatus::AccessDenied, message)
    }

    pub fn with_result<T: Serialize>(mut self, result: &T) -> SyncResult<Self> {
        self.result = serde_json::to_value(result)?;
        Ok(self)
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }
}

pub trait RequestHandler: Send + Sync {
    fn handle(
        &self,
        state: &ServerState,
        session: &mut Session,
        request: &RpcRequest,
        data: Option<Bytes>,
    ) -> SyncResult<Reply>;
}

impl<F> RequestHandler for F
where
    F: Fn(&ServerState, &mut Session, &RpcRequest, Option<Bytes>) -> SyncResult<Reply> + Send + Sync,
{
    fn handle(
        &self,
        state: &ServerState,
        session: &mut Session,
        request: &RpcRequest,
        data: Option<Bytes>,
    ) -> SyncResult<Reply> {
        self(state, session, request, data)
    }
}

/// Deserialize request parameters.
pub fn parse_params<T: DeserializeOwned>(request: &RpcRequest) -> SyncResult<T> {
    serde_json::from_value(request.params.clone()).map_err(|e| {
        SyncError::Protocol(format!("invalid params for {}: {}", request.method, e))
    })
}

pub struct Portal {
    state: Arc<ServerState>,
    handlers: HashMap<String, Box<dyn RequestHandler>>,
}

impl Portal {
    /// A portal with every built-in method registered.
    pub fn new(state: Arc<ServerState>) -> Self {
        let mut portal = Self::empty(state);
        handlers::register_all(&mut portal);
        portal
    }

    pub fn empty(state: Arc<ServerState>) -> Self {
        Self {
            state,
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, method: impl Into<String>, handler: impl RequestHandler + 'static) {
        self.handlers.insert(method.into(), Box::new(handler));
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn handle(&self, session: &mut Session, message: RpcMessage) -> SyncResult<RpcMessage> {
        let request = match message.parse_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(session = %session.id(), error = %e, "Unparsable request");
                let response = RpcResponse::new(0, JobStatus::Error, "invalid request");
                return RpcMessage::response(&response, None);
            }
        };

        let revoked = self.forget_revoked_tokens(session);

        let reply = match self.handlers.get(request.method.as_str()) {
            None => {
                debug!(method = %request.method, "No handler");
                Reply::error("no handler for request")
            }
            Some(handler) => match handler.handle(&self.state, session, &request, message.data) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(method = %request.method, error = %e, "Handler failed");
                    Reply::error(e.to_string())
                }
            },
        };
        debug!(
            session = %session.id(),
            method = %request.method,
            status = %reply.status,
            "Request handled"
        );

        let mut response =
            RpcResponse::new(request.id, reply.status, reply.message).with_result(reply.result);
        if !revoked.is_empty() {
            response.error = Some(format!("access token revoked: {}", revoked.join(", ")));
        }
        RpcMessage::response(&response, reply.data)
    }

    fn forget_revoked_tokens(&self, session: &mut Session) -> Vec<String> {
        let revoked: Vec<String> = session
            .token_ids()
            .filter(|id| !self.state.tokens.contains_id(id))
            .cloned()
            .collect();
        for id in &revoked {
            session.forget_token(id);
        }
        revoked
    }
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("Portal").field("methods", &methods).finish()
    }
}
