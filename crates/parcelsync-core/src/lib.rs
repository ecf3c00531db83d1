//! parcelsync core library
//!
//! Enveloped remote jobs for personal data sync.
//!
//! ## Overview
//!
//! A client hands a [`JobChain`] to the [`ConnectionManager`]. Each job
//! builds a request, optionally packs its binary payload through an
//! [`envelope`] writer, and interprets the response into a [`JobResult`].
//! A result of `FOLLOW_UP_JOB` runs the next registered job on the same
//! session before the observer hears anything.
//!
//! ```text
//! Client ─► ConnectionManager ─► Transport ─► Portal ─► AccessControl ─► BranchStore
//!    ▲                                                      │
//!    └──── IncomingCommandManager ◄── inbox ◄── SendCommand ┘
//! ```
//!
//! ## Modules
//!
//! - [`envelope`]: signature, symmetric and asymmetric envelopes
//! - [`remote`]: jobs, chains, schedulers and the connection manager
//! - [`command`]: inbox commands and their listeners
//! - [`access`]: PULL/PUSH tokens checked before storage is touched
//! - [`server`]: in-process portal used by tests and the demo
//!
//! ## Quick Start
//!
//! ```ignore
//! use parcelsync_core::{Client, ClientConfig, PortalConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let alice = Client::new(config, identity, "password", connector)?;
//!     alice.create_account().await?;
//!     let tip = alice.push("notes", b"hello".to_vec(), None).await?;
//!     Ok(())
//! }
//! ```

pub mod access;
pub mod client;
pub mod command;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod logging;
pub mod remote;
pub mod server;
pub mod settings;
pub mod storage;

// Re-exports
pub use access::{AccessControl, AccessRight, AccessRights, AccessToken};
pub use client::Client;
pub use command::{CommandListener, IncomingCommand, IncomingCommandManager};
pub use config::{ClientConfig, SchedulerKind};
pub use crypto::CryptoContext;
pub use error::{SyncError, SyncResult};
pub use identity::{ContactFinder, ContactPrivate, ContactPublic, ContactStore, KeyId};
pub use remote::{
    AuthInfo, ConnectionInfo, ConnectionManager, JobChain, JobResult, JobStatus, RetryPolicy,
};
pub use server::{Portal, PortalConnector, ServerState};
pub use settings::CryptoSettings;
pub use storage::{BranchStore, MemoryBranchStore};
