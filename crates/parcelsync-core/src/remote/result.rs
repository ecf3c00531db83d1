//! Job result model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  JobStatus (wire code)                                   │
//! │  ├── Done           0   finished successfully            │
//! │  ├── Continue       1   informational, never continues   │
//! │  ├── FollowUpJob    2   run the registered follow-up     │
//! │  ├── Error         -2   failed                           │
//! │  └── AccessDenied  -3   server refused the resource      │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::access::AccessToken;

/// Status of a finished job step. Only `FollowUpJob` continues a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum JobStatus {
    Done,
    Continue,
    Error,
    AccessDenied,
    FollowUpJob,
}

impl JobStatus {
    pub fn code(self) -> i32 {
        match self {
            JobStatus::Done => 0,
            JobStatus::Continue => 1,
            JobStatus::Error => -2,
            JobStatus::AccessDenied => -3,
            JobStatus::FollowUpJob => 2,
        }
    }

    /// Map a wire code; unknown codes are errors.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => JobStatus::Done,
            1 => JobStatus::Continue,
            -3 => JobStatus::AccessDenied,
            2 => JobStatus::FollowUpJob,
            _ => JobStatus::Error,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Continue)
    }
}

impl From<i32> for JobStatus {
    fn from(code: i32) -> Self {
        JobStatus::from_code(code)
    }
}

impl From<JobStatus> for i32 {
    fn from(status: JobStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Done => write!(f, "DONE"),
            JobStatus::Continue => write!(f, "CONTINUE"),
            JobStatus::Error => write!(f, "ERROR"),
            JobStatus::AccessDenied => write!(f, "ACCESS_DENIED"),
            JobStatus::FollowUpJob => write!(f, "FOLLOW_UP_JOB"),
        }
    }
}

/// Why a step ended in `Error` when the cause was detected client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCause {
    /// The response failed signature or authentication checks
    Integrity,
    /// The response could not be decrypted
    Confidentiality,
    /// The response had an unexpected shape
    Protocol,
    /// A follow-up was signalled without one being registered
    ChainIntegrity,
}

/// Snapshot of a branch returned by a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSnapshot {
    pub branch: String,
    pub tip: String,
    pub data: Bytes,
}

/// Outcome of a watch request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchResult {
    /// Branches whose remote tip differs from the tip the client sent
    pub updated: Vec<String>,
}

/// Job-specific result payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultData {
    /// Raw enveloped command payloads drained from an inbox
    Commands(Vec<Bytes>),
    /// New tip after a push
    Pushed { branch: String, tip: String },
    /// Branch content; `None` when the branch is empty
    Pulled(Option<BranchSnapshot>),
    Watch(WatchResult),
    /// Token registered for a grantee
    TokenRegistered(AccessToken),
}

/// Result of a job (or of a whole chain).
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub status: JobStatus,
    pub message: String,
    pub data: Option<ResultData>,
    pub cause: Option<ErrorCause>,
}

impl JobResult {
    pub fn new(status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
            cause: None,
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(JobStatus::Done, message)
    }

    pub fn follow_up(message: impl Into<String>) -> Self {
        Self::new(JobStatus::FollowUpJob, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(JobStatus::Error, message)
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(JobStatus::AccessDenied, message)
    }

    /// An `Error` result with a client-side cause attached.
    pub fn failed(cause: ErrorCause, message: impl Into<String>) -> Self {
        Self {
            cause: Some(cause),
            ..Self::error(message)
        }
    }

    pub fn with_data(mut self, data: ResultData) -> Self {
        self.data = Some(data);
        self
    }

    /// Turn a successful step into `FollowUpJob` when a follow-up is registered.
    pub fn continue_if(mut self, has_follow_up: bool) -> Self {
        if has_follow_up && self.status == JobStatus::Done {
            self.status = JobStatus::FollowUpJob;
        }
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }

    /// `Done`, or `FollowUpJob` with the chain about to continue.
    pub fn proceeds(&self) -> bool {
        matches!(self.status, JobStatus::Done | JobStatus::FollowUpJob)
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.status)
        } else {
            write!(f, "{}: {}", self.status, self.message)
        }
    }
}
