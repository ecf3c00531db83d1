//! In-process transport between a client and a [`Portal`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{Portal, Session};
use crate::error::{SyncError, SyncResult};
use crate::remote::{ConnectionInfo, RpcMessage, Transport, TransportFactory};

/// One client session on a portal.
///
/// Messages go through the frame codec in both directions so the exchange
/// behaves like a real wire.
pub struct InMemoryTransport {
    portal: Arc<Portal>,
    session: Mutex<Session>,
    offline: Arc<AtomicBool>,
}

impl InMemoryTransport {
    pub fn new(portal: Arc<Portal>) -> Self {
        Self::with_offline_flag(portal, Arc::new(AtomicBool::new(false)))
    }

    fn with_offline_flag(portal: Arc<Portal>, offline: Arc<AtomicBool>) -> Self {
        Self {
            portal,
            session: Mutex::new(Session::new()),
            offline,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, request: RpcMessage) -> SyncResult<RpcMessage> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity("server unreachable".to_string()));
        }
        let frame = request.to_frame();
        trace!(bytes = frame.len(), "Request frame");
        let request = RpcMessage::from_frame(&frame)?;
        let reply = {
            let mut session = self.session.lock();
            self.portal.handle(&mut session, request)?
        };
        RpcMessage::from_frame(&reply.to_frame())
    }
}

struct Endpoint {
    portal: Arc<Portal>,
    offline: Arc<AtomicBool>,
}

/// [`TransportFactory`] resolving server urls to in-process portals.
#[derive(Default)]
pub struct PortalConnector {
    endpoints: RwLock<HashMap<String, Endpoint>>,
}

impl PortalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, server_url: impl Into<String>, portal: Arc<Portal>) {
        let server_url = server_url.into();
        debug!(%server_url, "Portal registered");
        self.endpoints.write().insert(
            server_url,
            Endpoint {
                portal,
                offline: Arc::new(AtomicBool::new(false)),
            },
        );
    }

    /// Simulate an outage for every session on `server_url`.
    pub fn set_offline(&self, server_url: &str, offline: bool) -> bool {
        match self.endpoints.read().get(server_url) {
            Some(endpoint) => {
                endpoint.offline.store(offline, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

impl TransportFactory for PortalConnector {
    fn connect(&self, info: &ConnectionInfo) -> SyncResult<Arc<dyn Transport>> {
        let endpoints = self.endpoints.read();
        let endpoint = endpoints.get(&info.server_url).ok_or_else(|| {
            SyncError::Connectivity(format!("no server at {}", info.server_url))
        })?;
        if endpoint.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Connectivity(format!(
                "{} is unreachable",
                info.server_url
            )));
        }
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::with_offline_flag(
            endpoint.portal.clone(),
            endpoint.offline.clone(),
        ));
        Ok(transport)
    }
}

impl std::fmt::Debug for PortalConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoints = self.endpoints.read();
        let mut urls: Vec<&String> = endpoints.keys().collect();
        urls.sort();
        f.debug_struct("PortalConnector").field("endpoints", &urls).finish()
    }
}
