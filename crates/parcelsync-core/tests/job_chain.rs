//! Job chain execution through the connection manager
//!
//! A scripted transport answers every request with a fixed status so the
//! tests can drive chains step by step without a portal.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parcelsync_core::remote::jobs::PingJob;
use parcelsync_core::remote::{
    AuthInfo, ChannelObserver, ConnectionInfo, ConnectionManager, ErrorCause, InlineScheduler,
    Job, JobChain, JobContext, JobResult, JobStatus, OutgoingRequest, RemoteJob, RpcMessage,
    RpcResponse, StepInfo, TaskEvent, Transport, TransportFactory,
};
use parcelsync_core::settings::CryptoSettings;
use parcelsync_core::SyncResult;
use parking_lot::Mutex;
use serde_json::Value;

// ============================================================================
// Scripted transport
// ============================================================================

#[derive(Default)]
struct Script {
    /// Methods in the order they were received
    seen: Mutex<Vec<String>>,
    /// Statuses consumed one per request before `statuses` is consulted
    queued: Mutex<VecDeque<JobStatus>>,
    /// Status per method, `DONE` otherwise
    statuses: Mutex<Vec<(String, JobStatus)>>,
}

impl Script {
    fn answer(&self, method: &str, status: JobStatus) {
        self.statuses.lock().push((method.to_string(), status));
    }

    fn answer_in_order(&self, statuses: impl IntoIterator<Item = JobStatus>) {
        self.queued.lock().extend(statuses);
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl Transport for Script {
    fn send(&self, message: RpcMessage) -> SyncResult<RpcMessage> {
        let request = message.parse_request()?;
        self.seen.lock().push(request.method.clone());
        let queued = self.queued.lock().pop_front();
        let status = queued.unwrap_or_else(|| {
            self.statuses
                .lock()
                .iter()
                .find(|(method, _)| *method == request.method)
                .map(|(_, status)| *status)
                .unwrap_or(JobStatus::Done)
        });
        RpcMessage::response(
            &RpcResponse::new(request.id, status, format!("{} answered", request.method)),
            None,
        )
    }
}

struct ScriptFactory(Arc<Script>);

impl TransportFactory for ScriptFactory {
    fn connect(&self, _info: &ConnectionInfo) -> SyncResult<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = self.0.clone();
        Ok(transport)
    }
}

fn manager(script: &Arc<Script>) -> ConnectionManager {
    ConnectionManager::builder(Arc::new(ScriptFactory(script.clone())))
        .settings(CryptoSettings::fast())
        .start_scheduler(Arc::new(InlineScheduler))
        .observer_scheduler(Arc::new(InlineScheduler))
        .build()
        .unwrap()
}

fn info() -> ConnectionInfo {
    ConnectionInfo::new("script://", "alice")
}

// ============================================================================
// Jobs
// ============================================================================

/// Sends `method` and continues the chain whenever a follow-up is registered.
struct Step {
    method: &'static str,
    /// Job nominated while interpreting the response
    nominate: Option<&'static str>,
    /// Ignore `has_follow_up` and always ask for more
    always_follow_up: bool,
}

impl Step {
    fn job(method: &'static str) -> Job {
        Job::Custom(Box::new(Step {
            method,
            nominate: None,
            always_follow_up: false,
        }))
    }
}

impl RemoteJob for Step {
    fn name(&self) -> &'static str {
        self.method
    }

    fn build_request(&mut self, _cx: &JobContext) -> SyncResult<OutgoingRequest> {
        Ok(OutgoingRequest::new(self.method, Value::Null))
    }

    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        _data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult {
        let result = JobResult::new(response.status, response.message.clone());
        if self.always_follow_up && result.is_done() {
            return JobResult::follow_up(result.message);
        }
        result.continue_if(step.has_follow_up || self.nominate.is_some())
    }

    fn take_follow_up(&mut self) -> Option<Job> {
        self.nominate.take().map(Step::job)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_three_step_chain_reports_once() {
    let script = Arc::new(Script::default());
    let manager = manager(&script);
    let (observer, mut events) = ChannelObserver::new();

    let chain = JobChain::new(Step::job("first"))
        .then(Step::job("second"))
        .then(Step::job("third"));
    manager.submit(chain, info(), AuthInfo::None, Arc::new(observer));

    let mut progress = Vec::new();
    let result = loop {
        match events.recv().await.unwrap() {
            TaskEvent::Progress(step) => progress.push(step),
            TaskEvent::Result(result) => break result,
            TaskEvent::Failure(e) => panic!("chain failed: {}", e),
        }
    };

    assert_eq!(result.status, JobStatus::Done);
    assert_eq!(result.message, "third answered");
    assert_eq!(script.seen(), vec!["first", "second", "third"]);
    assert_eq!(
        progress.iter().map(|p| p.step).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    // Each follow-up sees the message of the step before it
    assert_eq!(progress[1].message, "first answered");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_follow_up_without_registration_fails() {
    let script = Arc::new(Script::default());
    let job = Job::Custom(Box::new(Step {
        method: "greedy",
        nominate: None,
        always_follow_up: true,
    }));

    let result = manager(&script)
        .run(JobChain::new(job), info(), AuthInfo::None)
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Error);
    assert_eq!(result.cause, Some(ErrorCause::ChainIntegrity));
    assert_eq!(script.seen(), vec!["greedy"]);
}

#[tokio::test]
async fn test_nominated_follow_up_runs_before_registered_steps() {
    let script = Arc::new(Script::default());
    let root = Job::Custom(Box::new(Step {
        method: "root",
        nominate: Some("nominated"),
        always_follow_up: false,
    }));

    let result = manager(&script)
        .run(JobChain::new(root).then(Step::job("last")), info(), AuthInfo::None)
        .await
        .unwrap();
    assert!(result.is_done());
    assert_eq!(script.seen(), vec!["root", "nominated", "last"]);
}

#[tokio::test]
async fn test_error_stops_chain() {
    let script = Arc::new(Script::default());
    script.answer("second", JobStatus::AccessDenied);

    let chain = JobChain::new(Step::job("first"))
        .then(Step::job("second"))
        .then(Step::job("third"));
    let result = manager(&script)
        .run(chain, info(), AuthInfo::None)
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::AccessDenied);
    assert_eq!(script.seen(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_continue_is_terminal() {
    let script = Arc::new(Script::default());
    script.answer("first", JobStatus::Continue);

    let chain = JobChain::new(Step::job("first")).then(Step::job("second"));
    let result = manager(&script)
        .run(chain, info(), AuthInfo::None)
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Continue);
    assert_eq!(script.seen(), vec!["first"]);
}

#[tokio::test]
async fn test_server_follow_ups_drive_registered_chain() {
    let script = Arc::new(Script::default());
    script.answer_in_order([JobStatus::FollowUpJob, JobStatus::FollowUpJob, JobStatus::Done]);
    let manager = manager(&script);
    let (observer, mut events) = ChannelObserver::new();

    let chain = JobChain::new(PingJob::new())
        .then(PingJob::new())
        .then(PingJob::new());
    manager.submit(chain, info(), AuthInfo::None, Arc::new(observer));

    let mut progress = 0;
    let result = loop {
        match events.recv().await.unwrap() {
            TaskEvent::Progress(_) => progress += 1,
            TaskEvent::Result(result) => break result,
            TaskEvent::Failure(e) => panic!("chain failed: {}", e),
        }
    };

    assert_eq!(result.status, JobStatus::Done);
    assert_eq!(script.seen(), vec!["ping", "ping", "ping"]);
    assert_eq!(progress, 3);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_server_follow_up_on_bare_root_fails() {
    let script = Arc::new(Script::default());
    script.answer("ping", JobStatus::FollowUpJob);

    let result = manager(&script)
        .run(JobChain::new(PingJob::new()), info(), AuthInfo::None)
        .await
        .unwrap();
    assert_eq!(result.status, JobStatus::Error);
    assert_eq!(result.cause, Some(ErrorCause::ChainIntegrity));
    assert_eq!(script.seen(), vec!["ping"]);
}
