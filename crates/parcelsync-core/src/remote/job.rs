//! Remote jobs, follow-up chains and the chain driver
//!
//! ## Chain Execution
//!
//! ```text
//! JobChain [A, B, C]
//!   │
//!   ├── A: build → (envelope) → send → (envelope) → interpret
//!   │      status FOLLOW_UP_JOB and B registered → continue
//!   ├── B: ... FOLLOW_UP_JOB, C registered → continue
//!   └── C: ... DONE → chain result
//! ```
//!
//! A step may only continue the chain if a follow-up is registered, either
//! when the chain was built or nominated by the job while interpreting its
//! response. Anything else ends the chain as `ERROR` with
//! [`ErrorCause::ChainIntegrity`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use crate::crypto::CryptoContext;
use crate::envelope::{EnvelopeReader, EnvelopeWriter};
use crate::error::{SyncError, SyncResult};
use crate::remote::jobs::{
    AccessRequestJob, CreateAccountJob, FetchCommandsJob, LoginJob, LoginParamsJob, PingJob,
    PullJob, PushJob, RegisterAccessTokenJob, SendCommandJob, WatchJob,
};
use crate::remote::{
    ConnectionInfo, ErrorCause, JobResult, JobStatus, RpcMessage, RpcRequest, RpcResponse,
    Transport,
};
use crate::settings::CryptoSettings;

/// What every job sees while building a request.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub crypto: CryptoContext,
    pub settings: CryptoSettings,
    pub connection: ConnectionInfo,
}

/// A request as built by a job, before envelopes and framing.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: &'static str,
    pub params: Value,
    pub data: Option<Vec<u8>>,
}

impl OutgoingRequest {
    pub fn new(method: &'static str, params: Value) -> Self {
        Self {
            method,
            params,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }
}

/// Per-step facts the driver passes to `interpret_response`.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    /// A follow-up is already registered after this step
    pub has_follow_up: bool,
}

/// Receives out-of-band server errors (e.g. an expired session). Advisory only.
pub type ErrorCallback = Arc<dyn Fn(&RpcResponse, Option<&Bytes>) + Send + Sync>;

/// One request/response unit of work.
pub trait RemoteJob: Send {
    fn name(&self) -> &'static str;

    /// Fails with [`SyncError::RequestConstruction`] when required state is missing.
    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest>;

    /// Writer applied to the request's binary data.
    fn request_envelope(&mut self, _cx: &JobContext) -> SyncResult<Option<Box<dyn EnvelopeWriter>>> {
        Ok(None)
    }

    /// Reader applied to the response's binary data.
    fn response_envelope(&mut self, _cx: &JobContext) -> SyncResult<Option<Box<dyn EnvelopeReader>>> {
        Ok(None)
    }

    /// Never fails: malformed or rejected responses become `ERROR` results.
    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult;

    /// A follow-up nominated while interpreting the response.
    fn take_follow_up(&mut self) -> Option<Job> {
        None
    }
}

/// Every job the client knows, plus an escape hatch for custom jobs.
pub enum Job {
    Ping(PingJob),
    CreateAccount(CreateAccountJob),
    LoginParams(LoginParamsJob),
    Login(LoginJob),
    SendCommand(SendCommandJob),
    FetchCommands(FetchCommandsJob),
    RegisterAccessToken(RegisterAccessTokenJob),
    AccessRequest(AccessRequestJob),
    Push(PushJob),
    Pull(PullJob),
    Watch(WatchJob),
    Custom(Box<dyn RemoteJob>),
}

macro_rules! dispatch {
    ($self:expr, $job:ident => $body:expr) => {
        match $self {
            Job::Ping($job) => $body,
            Job::CreateAccount($job) => $body,
            Job::LoginParams($job) => $body,
            Job::Login($job) => $body,
            Job::SendCommand($job) => $body,
            Job::FetchCommands($job) => $body,
            Job::RegisterAccessToken($job) => $body,
            Job::AccessRequest($job) => $body,
            Job::Push($job) => $body,
            Job::Pull($job) => $body,
            Job::Watch($job) => $body,
            Job::Custom($job) => $body,
        }
    };
}

impl RemoteJob for Job {
    fn name(&self) -> &'static str {
        dispatch!(self, job => job.name())
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        dispatch!(self, job => job.build_request(cx))
    }

    fn request_envelope(&mut self, cx: &JobContext) -> SyncResult<Option<Box<dyn EnvelopeWriter>>> {
        dispatch!(self, job => job.request_envelope(cx))
    }

    fn response_envelope(&mut self, cx: &JobContext) -> SyncResult<Option<Box<dyn EnvelopeReader>>> {
        dispatch!(self, job => job.response_envelope(cx))
    }

    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult {
        dispatch!(self, job => job.interpret_response(response, data, step))
    }

    fn take_follow_up(&mut self) -> Option<Job> {
        dispatch!(self, job => job.take_follow_up())
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Job({})", self.name())
    }
}

/// Ordered steps; the front is the step that runs next.
#[derive(Debug)]
pub struct JobChain {
    steps: VecDeque<Job>,
}

impl JobChain {
    pub fn new(root: impl Into<Job>) -> Self {
        let mut steps = VecDeque::new();
        steps.push_back(root.into());
        Self { steps }
    }

    /// Append a step at the end of the chain.
    pub fn then(mut self, job: impl Into<Job>) -> Self {
        self.steps.push_back(job.into());
        self
    }

    /// Register a follow-up for the root step.
    ///
    /// An existing follow-up is re-parented onto the new job (splice after,
    /// not replace): `[root, f]` becomes `[root, job, f]`.
    pub fn set_follow_up(&mut self, job: impl Into<Job>) {
        let at = self.steps.len().min(1);
        self.steps.insert(at, job.into());
    }

    /// Run `other` before the current steps.
    pub fn prepend(&mut self, other: JobChain) {
        for job in other.steps.into_iter().rev() {
            self.steps.push_front(job);
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|job| job.name()).collect()
    }
}

impl From<Job> for JobChain {
    fn from(job: Job) -> Self {
        JobChain::new(job)
    }
}

/// Shared cancellation flag for one submission.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notification emitted before each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainProgress {
    /// 1-based step number
    pub step: usize,
    pub job: &'static str,
    pub message: String,
}

/// Drive `chain` to completion over `transport`.
///
/// Transport failures, request construction failures and cancellation
/// propagate as `Err`; everything the server or the response content can
/// cause becomes a [`JobResult`].
pub fn run_chain(
    mut chain: JobChain,
    transport: &dyn Transport,
    cx: &JobContext,
    cancel: &CancelToken,
    error_callback: Option<&ErrorCallback>,
    progress: &mut dyn FnMut(ChainProgress),
) -> SyncResult<JobResult> {
    let mut step = 0usize;
    let mut message = String::new();

    while let Some(mut job) = chain.steps.pop_front() {
        if cancel.is_cancelled() {
            debug!(step, "Chain cancelled before next round trip");
            return Err(SyncError::Cancelled);
        }
        step += 1;
        let name = job.name();
        progress(ChainProgress {
            step,
            job: name,
            message: std::mem::take(&mut message),
        });

        let info = StepInfo {
            has_follow_up: !chain.is_empty(),
        };
        let result = execute_step(&mut job, transport, cx, step as u64, info, error_callback)?;
        if let Some(next) = job.take_follow_up() {
            chain.steps.push_front(next);
        }

        if result.status != JobStatus::FollowUpJob {
            debug!(job = name, status = %result.status, steps = step, "Chain finished");
            return Ok(result);
        }
        if chain.is_empty() {
            let violation = SyncError::ChainIntegrity(format!(
                "{} signalled a follow-up but none is registered",
                name
            ));
            warn!(job = name, "{}", violation);
            return Ok(JobResult::failed(ErrorCause::ChainIntegrity, violation.to_string()));
        }
        debug!(
            job = name,
            next = chain.steps.front().map(|j| j.name()).unwrap_or_default(),
            "Start follow up job after: {}",
            result.message
        );
        message = result.message;
    }

    Ok(JobResult::failed(
        ErrorCause::ChainIntegrity,
        SyncError::ChainIntegrity("empty chain".to_string()).to_string(),
    ))
}

fn execute_step(
    job: &mut Job,
    transport: &dyn Transport,
    cx: &JobContext,
    id: u64,
    info: StepInfo,
    error_callback: Option<&ErrorCallback>,
) -> SyncResult<JobResult> {
    let request = job.build_request(cx)?;
    let data = match (request.data, job.request_envelope(cx)?) {
        (Some(data), Some(writer)) => Some(Bytes::from(writer.pack(&data)?)),
        (data, _) => data.map(Bytes::from),
    };
    debug!(method = request.method, id, has_data = data.is_some(), "Sending request");
    let message = RpcMessage::request(&RpcRequest::new(id, request.method, request.params), data)?;

    let reply = transport.send(message)?;

    let response = match reply.parse_response() {
        Ok(response) => response,
        Err(e) => return Ok(JobResult::failed(ErrorCause::Protocol, e.to_string())),
    };
    if response.id != id {
        return Ok(JobResult::failed(
            ErrorCause::Protocol,
            format!("response id {} does not match request id {}", response.id, id),
        ));
    }
    if let Some(error) = &response.error {
        warn!(method = request.method, %error, "Server reported an out-of-band error");
        if let Some(callback) = error_callback {
            callback(&response, reply.data.as_ref());
        }
    }

    let data = match (reply.data, job.response_envelope(cx)?) {
        (Some(packed), Some(mut reader)) => match reader.unpack(&packed) {
            Ok(plain) => Some(Bytes::from(plain)),
            Err(e) => return Ok(JobResult::failed(cause_of(&e), e.to_string())),
        },
        (data, _) => data,
    };
    Ok(job.interpret_response(&response, data, info))
}

/// Classify an error raised while reading a response.
pub(crate) fn cause_of(error: &SyncError) -> ErrorCause {
    match error {
        SyncError::Integrity(_) => ErrorCause::Integrity,
        SyncError::Confidentiality(_) | SyncError::Crypto(_) => ErrorCause::Confidentiality,
        _ => ErrorCause::Protocol,
    }
}
