//! Client configuration file
//!
//! ```json
//! {
//!   "server_url": "mem://local",
//!   "user": "alice",
//!   "crypto": { "signature": "Ed25519", ... },
//!   "poll": { "max_attempts": 10, "delay_ms": 500 },
//!   "scheduler": "new_thread"
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::remote::{NewThreadScheduler, RetryPolicy, Scheduler, TokioBlockingScheduler};
use crate::settings::CryptoSettings;

/// Where submissions run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    NewThread,
    TokioBlocking,
}

impl SchedulerKind {
    /// `TokioBlocking` must be built inside a runtime.
    pub fn build(self) -> SyncResult<Arc<dyn Scheduler>> {
        Ok(match self {
            SchedulerKind::NewThread => Arc::new(NewThreadScheduler::default()),
            SchedulerKind::TokioBlocking => Arc::new(TokioBlockingScheduler::from_current()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub user: String,
    pub crypto: CryptoSettings,
    pub poll: RetryPolicy,
    pub scheduler: SchedulerKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "mem://local".to_string(),
            user: String::new(),
            crypto: CryptoSettings::default(),
            poll: RetryPolicy::default(),
            scheduler: SchedulerKind::default(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&text)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        self.crypto.validate()?;
        if self.poll.max_attempts == 0 {
            return Err(SyncError::Config("poll.max_attempts must be positive".to_string()));
        }
        if self.user.contains('@') {
            return Err(SyncError::Config(format!("user '{}' must not contain '@'", self.user)));
        }
        Ok(())
    }
}
