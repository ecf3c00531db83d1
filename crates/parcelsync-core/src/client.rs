//! Client facade over the connection and command managers
//!
//! ```text
//!  alice                              server                              bob
//!  create_account ─────────────────► accounts ◄──────────────── create_account
//!  send_contact_request("bob@…") ──► bob's inbox ──poll_commands──► contact stored
//!  grant_access(bob, "notes", PULL)
//!    RegisterAccessToken ──────────► token store
//!    SendCommand(AccessGranted) ───► bob's inbox ──poll_commands──► token stored
//!                                              ◄── request_access(token)
//!                                              ◄── pull("alice", "notes")
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::access::{AccessRights, AccessToken};
use crate::command::{CommandDecoder, CommandListener, IncomingCommand, IncomingCommandManager};
use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::identity::{parse_address, ContactPrivate, ContactPublic, ContactStore};
use crate::remote::jobs::{
    AccessRequestJob, CreateAccountJob, PullJob, PushJob, RegisterAccessTokenJob, WatchJob,
};
use crate::remote::{
    poll_with_retry, AuthInfo, BranchSnapshot, ConnectionInfo, ConnectionManager, JobChain,
    JobResult, ResultData, TransportFactory, WatchResult,
};

/// Records what arrives through the inbox.
struct Inbox {
    contacts: Arc<ContactStore>,
    tokens: RwLock<Vec<AccessToken>>,
}

impl CommandListener for Inbox {
    fn on_command_received(&self, command: &IncomingCommand) {
        match command {
            IncomingCommand::ContactRequest(contact) => {
                info!(contact = %contact.id().short(), address = ?contact.address(), "Contact added");
                self.contacts.add(contact.clone());
            }
            IncomingCommand::AccessGranted { contact_id, token } => {
                info!(
                    from = %contact_id.short(),
                    server_user = %token.server_user,
                    branch = %token.branch,
                    rights = %token.rights,
                    "Access granted"
                );
                let mut tokens = self.tokens.write();
                tokens.retain(|known| known.id != token.id);
                tokens.push(token.clone());
            }
        }
    }

    fn on_exception(&self, error: &SyncError) {
        warn!(error = %error, "Inbox command rejected");
    }
}

fn expect_done(result: JobResult) -> SyncResult<JobResult> {
    if result.is_done() {
        Ok(result)
    } else {
        Err(SyncError::Rejected(result))
    }
}

pub struct Client {
    config: ClientConfig,
    password: String,
    identity: ContactPrivate,
    connections: ConnectionManager,
    commands: IncomingCommandManager,
    inbox: Arc<Inbox>,
}

impl Client {
    /// Build a client whose connection manager follows `config`.
    pub fn new(
        config: ClientConfig,
        identity: ContactPrivate,
        password: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let connections = ConnectionManager::builder(factory)
            .settings(config.crypto)
            .start_scheduler(config.scheduler.build()?)
            .build()?;
        Self::with_connections(config, identity, password, connections)
    }

    /// Build a client on an existing connection manager.
    pub fn with_connections(
        config: ClientConfig,
        identity: ContactPrivate,
        password: impl Into<String>,
        connections: ConnectionManager,
    ) -> SyncResult<Self> {
        config.validate()?;
        if config.user.is_empty() {
            return Err(SyncError::Config("client needs a user".to_string()));
        }
        let password = password.into();
        let contacts = Arc::new(ContactStore::new());
        let decoder = CommandDecoder::new(*connections.settings(), identity.clone(), contacts.clone());
        let commands = IncomingCommandManager::new(
            decoder,
            connections.clone(),
            ConnectionInfo::new(config.server_url.clone(), config.user.clone()),
            AuthInfo::password(config.user.clone(), password.clone()),
        );
        let inbox = Arc::new(Inbox {
            contacts,
            tokens: RwLock::new(Vec::new()),
        });
        commands.add_listener(inbox.clone());

        Ok(Self {
            config,
            password,
            identity,
            connections,
            commands,
            inbox,
        })
    }

    pub fn user(&self) -> &str {
        &self.config.user
    }

    pub fn identity(&self) -> &ContactPrivate {
        &self.identity
    }

    pub fn contacts(&self) -> &Arc<ContactStore> {
        &self.inbox.contacts
    }

    pub fn commands(&self) -> &IncomingCommandManager {
        &self.commands
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Tokens received through `AccessGranted` commands.
    pub fn received_tokens(&self) -> Vec<AccessToken> {
        self.inbox.tokens.read().clone()
    }

    /// First received token covering `branch` of `server_user`.
    pub fn token_for(&self, server_user: &str, branch: &str) -> Option<AccessToken> {
        self.inbox
            .tokens
            .read()
            .iter()
            .find(|token| token.server_user == server_user && token.branch == branch)
            .cloned()
    }

    fn connection(&self, server_user: &str) -> ConnectionInfo {
        ConnectionInfo::new(self.config.server_url.clone(), server_user)
    }

    /// Own data is accessed logged in, anyone else's through session tokens.
    fn auth_for(&self, server_user: &str) -> AuthInfo {
        if server_user == self.config.user {
            AuthInfo::password(self.config.user.clone(), self.password.clone())
        } else {
            AuthInfo::None
        }
    }

    async fn run(&self, chain: JobChain, server_user: &str) -> SyncResult<JobResult> {
        let result = self
            .connections
            .run(chain, self.connection(server_user), self.auth_for(server_user))
            .await?;
        expect_done(result)
    }

    pub async fn create_account(&self) -> SyncResult<()> {
        let job = CreateAccountJob::new(self.config.user.clone(), self.password.clone());
        let result = self
            .connections
            .run(JobChain::new(job), self.connection(&self.config.user), AuthInfo::None)
            .await?;
        expect_done(result)?;
        info!(user = %self.config.user, server = %self.config.server_url, "Account created");
        Ok(())
    }

    /// Introduce ourselves to `address` (`user@server`).
    pub async fn send_contact_request(&self, address: &str) -> SyncResult<()> {
        let (receiver, _) = parse_address(address)?;
        let job = IncomingCommand::ContactRequest(self.identity.public().clone())
            .seal(self.connections.crypto(), *self.connections.settings(), &self.identity, None)?
            .into_job(receiver);
        self.run(JobChain::new(job), &self.config.user).await?;
        debug!(to = %address, "Contact request sent");
        Ok(())
    }

    /// Register a token for `grantee` and deliver it to their inbox in one chain.
    pub async fn grant_access(
        &self,
        grantee: &ContactPublic,
        branch: &str,
        rights: AccessRights,
    ) -> SyncResult<AccessToken> {
        let address = grantee.address().ok_or_else(|| {
            SyncError::RequestConstruction(format!("contact {} has no address", grantee.id().short()))
        })?;
        let (receiver, _) = parse_address(address)?;

        let token = AccessToken::new(
            self.connections.crypto(),
            self.config.user.clone(),
            branch,
            rights,
            grantee.id().clone(),
        );
        let command = IncomingCommand::AccessGranted {
            contact_id: self.identity.id().clone(),
            token: token.clone(),
        };
        let chain = JobChain::new(RegisterAccessTokenJob::new(token.clone(), grantee)?).then(
            command
                .seal(
                    self.connections.crypto(),
                    *self.connections.settings(),
                    &self.identity,
                    Some(grantee),
                )?
                .into_job(receiver),
        );
        self.run(chain, &self.config.user).await?;
        info!(%branch, %rights, grantee = %grantee.id().short(), "Access granted");
        Ok(token)
    }

    /// Claim `token` for this client's session with the owner.
    pub async fn request_access(&self, token: &AccessToken) -> SyncResult<()> {
        let job = AccessRequestJob::new(token.clone(), self.identity.clone());
        self.run(JobChain::new(job), &token.server_user).await?;
        debug!(server_user = %token.server_user, branch = %token.branch, "Access token accepted");
        Ok(())
    }

    /// Push to one of our own branches. Returns the new tip.
    pub async fn push(&self, branch: &str, data: Vec<u8>, expected_tip: Option<String>) -> SyncResult<String> {
        let job = PushJob::new(branch, data).expecting_tip(expected_tip);
        let result = self.run(JobChain::new(job), &self.config.user).await?;
        match result.data {
            Some(ResultData::Pushed { tip, .. }) => Ok(tip),
            other => Err(SyncError::Protocol(format!("push returned {:?}", other))),
        }
    }

    pub async fn pull(&self, server_user: &str, branch: &str) -> SyncResult<Option<BranchSnapshot>> {
        let result = self.run(JobChain::new(PullJob::new(branch)), server_user).await?;
        match result.data {
            Some(ResultData::Pulled(snapshot)) => Ok(snapshot),
            other => Err(SyncError::Protocol(format!("pull returned {:?}", other))),
        }
    }

    /// Ask which of `known` (branch → last seen tip) moved on the server.
    pub async fn peek_remote_status(
        &self,
        server_user: &str,
        known: BTreeMap<String, Option<String>>,
    ) -> SyncResult<WatchResult> {
        let result = self.run(JobChain::new(WatchJob::new(known)), server_user).await?;
        match result.data {
            Some(ResultData::Watch(watch)) => Ok(watch),
            other => Err(SyncError::Protocol(format!("watch returned {:?}", other))),
        }
    }

    /// Peek until something moved, at most `config.poll.max_attempts` times.
    pub async fn wait_for_remote_update(
        &self,
        server_user: &str,
        known: BTreeMap<String, Option<String>>,
    ) -> SyncResult<Option<WatchResult>> {
        poll_with_retry(self.config.poll, move |_| {
            let known = known.clone();
            async move {
                let watch = self.peek_remote_status(server_user, known).await?;
                Ok::<_, SyncError>((!watch.updated.is_empty()).then_some(watch))
            }
        })
        .await
    }

    /// Drain the inbox once.
    pub async fn poll_commands(&self) -> SyncResult<usize> {
        self.commands.poll_once().await
    }

    /// Drain the inbox every `interval` until the handle is aborted.
    pub fn start_polling(&self, interval: Duration) -> JoinHandle<()> {
        self.commands.start(interval)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("user", &self.config.user)
            .field("server", &self.config.server_url)
            .field("identity", &self.identity.id().short())
            .finish_non_exhaustive()
    }
}
