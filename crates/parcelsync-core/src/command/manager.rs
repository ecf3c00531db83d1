//! Incoming command dispatch
//!
//! ```text
//! poll_once ──FetchCommands──► [packed, packed, ...]
//!                                  │ decode each
//!                                  ├── Ok  → every listener.on_command_received
//!                                  └── Err → every listener.on_exception
//! ```
//!
//! Listeners are dispatched from a snapshot of the registry, so a listener
//! may add or remove listeners (itself included) from inside a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CommandDecoder, IncomingCommand};
use crate::error::{SyncError, SyncResult};
use crate::remote::jobs::FetchCommandsJob;
use crate::remote::{AuthInfo, ConnectionInfo, ConnectionManager, JobChain, JobStatus, ResultData};

pub trait CommandListener: Send + Sync {
    fn on_command_received(&self, command: &IncomingCommand);

    fn on_exception(&self, error: &SyncError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct CommandInner {
    decoder: CommandDecoder,
    connections: ConnectionManager,
    info: ConnectionInfo,
    auth: AuthInfo,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn CommandListener>)>>,
    next_id: AtomicU64,
}

/// Fetches the own inbox and notifies listeners.
#[derive(Clone)]
pub struct IncomingCommandManager {
    inner: Arc<CommandInner>,
}

impl IncomingCommandManager {
    /// `info` names the own account, `auth` logs into it.
    pub fn new(
        decoder: CommandDecoder,
        connections: ConnectionManager,
        info: ConnectionInfo,
        auth: AuthInfo,
    ) -> Self {
        Self {
            inner: Arc::new(CommandInner {
                decoder,
                connections,
                info,
                auth,
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn CommandListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn CommandListener>> {
        self.inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn dispatch_exception(&self, error: &SyncError) {
        for listener in self.snapshot() {
            listener.on_exception(error);
        }
    }

    /// Decode one enveloped command and notify every listener.
    pub fn handle_payload(&self, packed: &[u8]) -> Option<IncomingCommand> {
        match self.inner.decoder.decode(packed) {
            Ok(command) => {
                debug!(command = command.name(), "Command received");
                for listener in self.snapshot() {
                    listener.on_command_received(&command);
                }
                Some(command)
            }
            Err(e) => {
                warn!(error = %e, "Dropping undecodable command");
                self.dispatch_exception(&e);
                None
            }
        }
    }

    /// Drain the inbox once. Returns the number of commands delivered.
    pub async fn poll_once(&self) -> SyncResult<usize> {
        let outcome = self
            .inner
            .connections
            .run(
                JobChain::new(FetchCommandsJob::new()),
                self.inner.info.clone(),
                self.inner.auth.clone(),
            )
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.dispatch_exception(&e);
                return Err(e);
            }
        };
        if result.status != JobStatus::Done {
            let e = SyncError::Protocol(format!("fetching commands failed: {}", result));
            self.dispatch_exception(&e);
            return Err(e);
        }

        let packed = match result.data {
            Some(ResultData::Commands(commands)) => commands,
            _ => Vec::new(),
        };
        let delivered = packed
            .iter()
            .filter_map(|command| self.handle_payload(command))
            .count();
        if !packed.is_empty() {
            info!(fetched = packed.len(), delivered, "Inbox drained");
        }
        Ok(delivered)
    }

    /// Poll every `interval` on the current tokio runtime until the handle is aborted.
    pub fn start(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.poll_once().await {
                    debug!(error = %e, "Inbox poll failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for IncomingCommandManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingCommandManager")
            .field("connection", &self.inner.info)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}
