//! Connection manager: sessions, authentication, scheduling and delivery
//!
//! ```text
//! submit ──► start scheduler ──► session(info) ──► login if needed ──► run_chain
//!                                                                        │
//!             observer scheduler ◄── Progress* ── Result | Failure ◄─────┘
//! ```
//!
//! Each submission owns a small delivery queue. Every event schedules one
//! delivery task on the observer scheduler. A task takes the submission's
//! delivery lock, pops the queue head and runs the callback, so callbacks for
//! one submission are serialized and arrive in order even on a scheduler that
//! runs tasks on arbitrary threads. The queue itself has its own short-lived
//! lock: a slow observer never blocks the chain pushing new events. The first
//! terminal event closes the queue; once the submission is cancelled nothing
//! more is delivered.
//!
//! Sessions are cached per connection *and* per [`AuthInfo`]: a submission
//! only ever runs on a transport authenticated exactly as it asked, so an
//! unauthenticated submission never inherits a login and two users never
//! share one server session.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use ulid::Ulid;

use super::jobs::LoginParamsJob;
use super::scheduler::{LooperScheduler, NewThreadScheduler, Scheduler};
use super::{
    run_chain, AuthInfo, CancelToken, ChainProgress, ConnectionInfo, ErrorCallback, JobChain,
    JobContext, JobResult, Transport, TransportFactory,
};
use crate::crypto::CryptoContext;
use crate::error::{SyncError, SyncResult};
use crate::settings::CryptoSettings;

/// Receives the outcome of one submission.
///
/// Exactly one of `on_result` / `on_exception` is called, after every
/// `on_progress`, unless the submission was cancelled.
pub trait JobObserver: Send + Sync {
    fn on_progress(&self, _progress: ChainProgress) {}

    fn on_result(&self, result: JobResult);

    fn on_exception(&self, error: SyncError);
}

/// Observer events as a stream.
#[derive(Debug)]
pub enum TaskEvent {
    Progress(ChainProgress),
    Result(JobResult),
    Failure(SyncError),
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskEvent::Progress(_))
    }
}

/// Forwards observer callbacks into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }
}

impl JobObserver for ChannelObserver {
    fn on_progress(&self, progress: ChainProgress) {
        self.forward(TaskEvent::Progress(progress));
    }

    fn on_result(&self, result: JobResult) {
        self.forward(TaskEvent::Result(result));
    }

    fn on_exception(&self, error: SyncError) {
        self.forward(TaskEvent::Failure(error));
    }
}

/// Handle returned by [`ConnectionManager::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    id: Ulid,
    cancel: CancelToken,
}

impl Submission {
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Stop before the next round trip and suppress further callbacks.
    pub fn cancel(&self) {
        debug!(submission = %self.id, "Submission cancelled");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    info: ConnectionInfo,
    auth: AuthInfo,
}

struct Established {
    transport: Arc<dyn Transport>,
    authenticated: bool,
}

#[derive(Default)]
struct SessionSlot {
    state: Mutex<Option<Established>>,
}

enum Prepared {
    Ready(Arc<dyn Transport>),
    /// Authentication was refused; the refusal is the submission's result
    Rejected(JobResult),
}

struct Inner {
    crypto: CryptoContext,
    settings: CryptoSettings,
    factory: Arc<dyn TransportFactory>,
    sessions: Mutex<HashMap<SessionKey, Arc<SessionSlot>>>,
    start: Arc<dyn Scheduler>,
    observer: Arc<dyn Scheduler>,
    error_callback: Option<ErrorCallback>,
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    factory: Arc<dyn TransportFactory>,
    crypto: Option<CryptoContext>,
    settings: CryptoSettings,
    start: Option<Arc<dyn Scheduler>>,
    observer: Option<Arc<dyn Scheduler>>,
    error_callback: Option<ErrorCallback>,
}

impl ConnectionManagerBuilder {
    pub fn crypto(mut self, crypto: CryptoContext) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn settings(mut self, settings: CryptoSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Where chains run. Defaults to a new thread per submission.
    pub fn start_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.start = Some(scheduler);
        self
    }

    /// Where observer callbacks run. Defaults to a dedicated looper thread.
    pub fn observer_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.observer = Some(scheduler);
        self
    }

    pub fn error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }

    pub fn build(self) -> SyncResult<ConnectionManager> {
        self.settings.validate()?;
        let observer = match self.observer {
            Some(observer) => observer,
            None => Arc::new(LooperScheduler::new("parcelsync-observer")?),
        };
        Ok(ConnectionManager {
            inner: Arc::new(Inner {
                crypto: self.crypto.unwrap_or_default(),
                settings: self.settings,
                factory: self.factory,
                sessions: Mutex::new(HashMap::new()),
                start: self
                    .start
                    .unwrap_or_else(|| Arc::new(NewThreadScheduler::default())),
                observer,
                error_callback: self.error_callback,
            }),
        })
    }
}

/// Submits job chains against named connections.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn builder(factory: Arc<dyn TransportFactory>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            factory,
            crypto: None,
            settings: CryptoSettings::default(),
            start: None,
            observer: None,
            error_callback: None,
        }
    }

    pub fn settings(&self) -> &CryptoSettings {
        &self.inner.settings
    }

    pub fn crypto(&self) -> &CryptoContext {
        &self.inner.crypto
    }

    /// Run `chain` on the start scheduler; never blocks the caller.
    pub fn submit(
        &self,
        chain: JobChain,
        info: ConnectionInfo,
        auth: AuthInfo,
        observer: Arc<dyn JobObserver>,
    ) -> Submission {
        let submission = Submission {
            id: Ulid::new(),
            cancel: CancelToken::new(),
        };
        debug!(
            submission = %submission.id,
            connection = %info,
            jobs = ?chain.names(),
            "Submitting chain"
        );

        let delivery = Arc::new(Delivery {
            observer,
            scheduler: self.inner.observer.clone(),
            cancel: submission.cancel.clone(),
            state: Mutex::new(DeliveryState::default()),
            serial: Mutex::new(()),
        });
        let inner = self.inner.clone();
        let cancel = submission.cancel.clone();
        let id = submission.id;
        let key = SessionKey { info, auth };

        self.inner.start.schedule(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                inner.execute(chain, &key, &cancel, &mut |progress| {
                    delivery.push(TaskEvent::Progress(progress))
                })
            }))
            .unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                error!(submission = %id, connection = %key.info, %reason, "Job panicked");
                inner.invalidate(&key);
                Err(SyncError::JobPanicked(reason))
            });
            match outcome {
                Ok(result) => {
                    debug!(submission = %id, status = %result.status, "Submission finished");
                    delivery.push(TaskEvent::Result(result));
                }
                Err(SyncError::Cancelled) => {
                    debug!(submission = %id, "Submission stopped after cancellation");
                }
                Err(e) => {
                    warn!(submission = %id, connection = %key.info, error = %e, "Submission failed");
                    if e.is_transport() {
                        inner.invalidate(&key);
                    }
                    delivery.push(TaskEvent::Failure(e));
                }
            }
        }));
        submission
    }

    /// Submit and await the terminal event.
    pub async fn run(
        &self,
        chain: JobChain,
        info: ConnectionInfo,
        auth: AuthInfo,
    ) -> SyncResult<JobResult> {
        let (observer, mut events) = ChannelObserver::new();
        self.submit(chain, info, auth, Arc::new(observer));
        while let Some(event) = events.recv().await {
            match event {
                TaskEvent::Progress(progress) => {
                    trace!(step = progress.step, job = progress.job, "Chain progress");
                }
                TaskEvent::Result(result) => return Ok(result),
                TaskEvent::Failure(e) => return Err(e),
            }
        }
        Err(SyncError::Cancelled)
    }

    /// Drop every cached session for `info`; the next submission reconnects.
    pub fn close(&self, info: &ConnectionInfo) -> bool {
        let mut sessions = self.inner.sessions.lock();
        let before = sessions.len();
        sessions.retain(|key, _| key.info != *info);
        let removed = sessions.len() != before;
        if removed {
            debug!(connection = %info, "Sessions closed");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.inner.settings)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn execute(
        &self,
        chain: JobChain,
        key: &SessionKey,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(ChainProgress),
    ) -> SyncResult<JobResult> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let cx = JobContext {
            crypto: self.crypto.clone(),
            settings: self.settings,
            connection: key.info.clone(),
        };
        let transport = match self.session(&cx, key, cancel)? {
            Prepared::Ready(transport) => transport,
            Prepared::Rejected(result) => return Ok(result),
        };
        run_chain(
            chain,
            transport.as_ref(),
            &cx,
            cancel,
            self.error_callback.as_ref(),
            progress,
        )
    }

    /// Resolve the session for a connection and auth pair, establishing and
    /// authenticating it under the slot lock.
    fn session(&self, cx: &JobContext, key: &SessionKey, cancel: &CancelToken) -> SyncResult<Prepared> {
        let slot = self
            .sessions
            .lock()
            .entry(key.clone())
            .or_default()
            .clone();
        let mut state = slot.state.lock();

        let mut established = match state.take() {
            Some(established) => established,
            None => {
                info!(connection = %cx.connection, "Establishing session");
                Established {
                    transport: self.factory.connect(&cx.connection)?,
                    authenticated: false,
                }
            }
        };

        match self.authenticate(&mut established, cx, &key.auth, cancel) {
            Err(e) if e.is_transport() => Err(e),
            outcome => {
                let transport = established.transport.clone();
                *state = Some(established);
                outcome.map(|rejected| match rejected {
                    Some(result) => Prepared::Rejected(result),
                    None => Prepared::Ready(transport),
                })
            }
        }
    }

    fn authenticate(
        &self,
        established: &mut Established,
        cx: &JobContext,
        auth: &AuthInfo,
        cancel: &CancelToken,
    ) -> SyncResult<Option<JobResult>> {
        let AuthInfo::Password { user, password } = auth else {
            return Ok(None);
        };
        if established.authenticated {
            return Ok(None);
        }

        debug!(%user, connection = %cx.connection, "Logging in");
        let chain = JobChain::new(LoginParamsJob::new(user.clone(), password.clone()));
        let result = run_chain(
            chain,
            established.transport.as_ref(),
            cx,
            cancel,
            self.error_callback.as_ref(),
            &mut |_| {},
        )?;
        if result.is_done() {
            info!(%user, connection = %cx.connection, "Logged in");
            established.authenticated = true;
            Ok(None)
        } else {
            warn!(%user, result = %result, "Login refused");
            Ok(Some(result))
        }
    }

    fn invalidate(&self, key: &SessionKey) -> bool {
        let removed = self.sessions.lock().remove(key).is_some();
        if removed {
            debug!(connection = %key.info, auth = ?key.auth, "Session dropped");
        }
        removed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Default)]
struct DeliveryState {
    queue: VecDeque<TaskEvent>,
    terminated: bool,
}

struct Delivery {
    observer: Arc<dyn JobObserver>,
    scheduler: Arc<dyn Scheduler>,
    cancel: CancelToken,
    state: Mutex<DeliveryState>,
    /// Held while a callback runs
    serial: Mutex<()>,
}

impl Delivery {
    fn push(self: &Arc<Self>, event: TaskEvent) {
        {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = event.is_terminal();
            state.queue.push_back(event);
        }
        let delivery = self.clone();
        self.scheduler
            .schedule(Box::new(move || delivery.deliver_next()));
    }

    fn deliver_next(&self) {
        let _serial = self.serial.lock();
        let next = self.state.lock().queue.pop_front();
        let Some(event) = next else {
            return;
        };
        if self.cancel.is_cancelled() {
            trace!(terminal = event.is_terminal(), "Dropping event of cancelled submission");
            return;
        }
        match event {
            TaskEvent::Progress(progress) => self.observer.on_progress(progress),
            TaskEvent::Result(result) => self.observer.on_result(result),
            TaskEvent::Failure(error) => self.observer.on_exception(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::jobs::PingJob;
    use crate::remote::rpc::methods;
    use crate::remote::scheduler::{InlineScheduler, Task};
    use crate::remote::{
        Job, JobStatus, OutgoingRequest, RemoteJob, RpcMessage, RpcResponse, StepInfo,
    };
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct StubTransport {
        calls: Mutex<Vec<String>>,
        offline: AtomicBool,
    }

    impl Transport for StubTransport {
        fn send(&self, message: RpcMessage) -> SyncResult<RpcMessage> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(SyncError::Connectivity("connection refused".into()));
            }
            let request = message.parse_request()?;
            self.calls.lock().push(request.method.clone());
            let response = match request.method.as_str() {
                methods::LOGIN_PARAMS => RpcResponse::new(request.id, JobStatus::Done, "")
                    .with_result(json!({
                        "salt": "0011",
                        "kdf": "Pbkdf2HmacSha256",
                        "kdf_iterations": 16
                    })),
                _ => RpcResponse::new(request.id, JobStatus::Done, "ok"),
            };
            RpcMessage::response(&response, None)
        }
    }

    #[derive(Default)]
    struct StubFactory {
        transport: Arc<StubTransport>,
        connects: AtomicUsize,
    }

    impl TransportFactory for StubFactory {
        fn connect(&self, _info: &ConnectionInfo) -> SyncResult<Arc<dyn Transport>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let transport: Arc<dyn Transport> = self.transport.clone();
            Ok(transport)
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl JobObserver for Recorder {
        fn on_progress(&self, progress: ChainProgress) {
            self.events.lock().push(format!("progress {}", progress.step));
        }

        fn on_result(&self, result: JobResult) {
            self.events.lock().push(format!("result {}", result.status));
        }

        fn on_exception(&self, error: SyncError) {
            self.events.lock().push(format!("exception {}", error));
        }
    }

    /// Holds tasks until the test runs them.
    #[derive(Default)]
    struct ManualScheduler {
        tasks: Mutex<VecDeque<Task>>,
    }

    impl ManualScheduler {
        fn run_all(&self) {
            loop {
                let task = self.tasks.lock().pop_front();
                match task {
                    Some(task) => task(),
                    None => break,
                }
            }
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, task: Task) {
            self.tasks.lock().push_back(task);
        }
    }

    fn manager(
        factory: Arc<StubFactory>,
        start: Arc<dyn Scheduler>,
        observer: Arc<dyn Scheduler>,
    ) -> ConnectionManager {
        ConnectionManager::builder(factory)
            .settings(CryptoSettings::fast())
            .start_scheduler(start)
            .observer_scheduler(observer)
            .build()
            .unwrap()
    }

    fn pings(n: usize) -> JobChain {
        let mut chain = JobChain::new(PingJob::new());
        for _ in 1..n {
            chain = chain.then(PingJob::new());
        }
        chain
    }

    fn info() -> ConnectionInfo {
        ConnectionInfo::new("local", "alice")
    }

    #[test]
    fn test_chain_runs_every_step_then_one_result() {
        let factory = Arc::new(StubFactory::default());
        let manager = manager(factory.clone(), Arc::new(InlineScheduler), Arc::new(InlineScheduler));
        let recorder = Arc::new(Recorder::default());

        manager.submit(pings(4), info(), AuthInfo::None, recorder.clone());

        assert_eq!(factory.transport.calls.lock().len(), 4);
        assert_eq!(
            *recorder.events.lock(),
            vec!["progress 1", "progress 2", "progress 3", "progress 4", "result DONE"]
        );
    }

    #[test]
    fn test_session_established_once() {
        let factory = Arc::new(StubFactory::default());
        let manager = manager(factory.clone(), Arc::new(InlineScheduler), Arc::new(InlineScheduler));
        for _ in 0..3 {
            manager.submit(pings(1), info(), AuthInfo::None, Arc::new(Recorder::default()));
        }
        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_password_login_runs_once_per_session() {
        let factory = Arc::new(StubFactory::default());
        let manager = manager(factory.clone(), Arc::new(InlineScheduler), Arc::new(InlineScheduler));
        let auth = AuthInfo::password("alice", "pw");
        manager.submit(pings(1), info(), auth.clone(), Arc::new(Recorder::default()));
        manager.submit(pings(1), info(), auth, Arc::new(Recorder::default()));

        assert_eq!(
            *factory.transport.calls.lock(),
            vec!["loginParams", "login", "ping", "ping"]
        );
    }

    #[test]
    fn test_sessions_are_isolated_per_auth() {
        let factory = Arc::new(StubFactory::default());
        let manager = manager(factory.clone(), Arc::new(InlineScheduler), Arc::new(InlineScheduler));
        for auth in [
            AuthInfo::password("alice", "pw"),
            AuthInfo::None,
            AuthInfo::password("bob", "pw"),
            AuthInfo::password("alice", "pw"),
        ] {
            manager.submit(pings(1), info(), auth, Arc::new(Recorder::default()));
        }

        assert_eq!(factory.connects.load(Ordering::SeqCst), 3);
        assert_eq!(manager.session_count(), 3);
        assert_eq!(
            *factory.transport.calls.lock(),
            vec!["loginParams", "login", "ping", "ping", "loginParams", "login", "ping", "ping"]
        );

        assert!(manager.close(&info()));
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_transport_failure_is_exception_and_drops_session() {
        let factory = Arc::new(StubFactory::default());
        factory.transport.offline.store(true, Ordering::SeqCst);
        let manager = manager(factory.clone(), Arc::new(InlineScheduler), Arc::new(InlineScheduler));
        let recorder = Arc::new(Recorder::default());

        manager.submit(pings(2), info(), AuthInfo::None, recorder.clone());

        let events = recorder.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], "progress 1");
        assert!(events[1].starts_with("exception Connectivity error"));
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn test_cancel_before_start_delivers_nothing() {
        let factory = Arc::new(StubFactory::default());
        let start = Arc::new(ManualScheduler::default());
        let manager = manager(factory.clone(), start.clone(), Arc::new(InlineScheduler));
        let recorder = Arc::new(Recorder::default());

        let submission = manager.submit(pings(3), info(), AuthInfo::None, recorder.clone());
        submission.cancel();
        start.run_all();

        assert!(recorder.events.lock().is_empty());
        assert!(factory.transport.calls.lock().is_empty());
        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_suppresses_pending_delivery() {
        let factory = Arc::new(StubFactory::default());
        let observer = Arc::new(ManualScheduler::default());
        let manager = manager(factory.clone(), Arc::new(InlineScheduler), observer.clone());
        let recorder = Arc::new(Recorder::default());

        let submission = manager.submit(pings(2), info(), AuthInfo::None, recorder.clone());
        submission.cancel();
        observer.run_all();

        assert!(recorder.events.lock().is_empty());
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_on_real_schedulers() {
        let factory = Arc::new(StubFactory::default());
        let manager = ConnectionManager::builder(factory.clone())
            .settings(CryptoSettings::fast())
            .build()
            .unwrap();
        let result = manager.run(pings(3), info(), AuthInfo::None).await.unwrap();
        assert_eq!(result.status, JobStatus::Done);
        assert_eq!(factory.transport.calls.lock().len(), 3);
    }

    #[test]
    fn test_out_of_order_scheduler_keeps_event_order() {
        struct Reversing(Mutex<Vec<Task>>);
        impl Scheduler for Reversing {
            fn schedule(&self, task: Task) {
                self.0.lock().push(task);
            }
        }

        let factory = Arc::new(StubFactory::default());
        let observer = Arc::new(Reversing(Mutex::new(Vec::new())));
        let manager = manager(factory, Arc::new(InlineScheduler), observer.clone());
        let recorder = Arc::new(Recorder::default());
        manager.submit(pings(2), info(), AuthInfo::None, recorder.clone());

        let tasks: Vec<Task> = std::mem::take(&mut *observer.0.lock());
        for task in tasks.into_iter().rev() {
            task();
        }
        assert_eq!(
            *recorder.events.lock(),
            vec!["progress 1", "progress 2", "result DONE"]
        );
    }

    /// Indexes into an empty list while building its request.
    struct Broken;

    impl RemoteJob for Broken {
        fn name(&self) -> &'static str {
            "Broken"
        }

        fn build_request(&mut self, _cx: &JobContext) -> SyncResult<OutgoingRequest> {
            let methods: Vec<&'static str> = Vec::new();
            Ok(OutgoingRequest::new(methods[0], Value::Null))
        }

        fn interpret_response(
            &mut self,
            _response: &RpcResponse,
            _data: Option<Bytes>,
            _step: StepInfo,
        ) -> JobResult {
            JobResult::done("")
        }
    }

    #[test]
    fn test_panicking_job_is_one_exception() {
        let factory = Arc::new(StubFactory::default());
        let manager = manager(factory.clone(), Arc::new(InlineScheduler), Arc::new(InlineScheduler));
        let recorder = Arc::new(Recorder::default());

        manager.submit(
            JobChain::new(Job::Custom(Box::new(Broken))),
            info(),
            AuthInfo::None,
            recorder.clone(),
        );

        let events = recorder.events.lock().clone();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], "progress 1");
        assert!(events[1].starts_with("exception Job panicked"), "{}", events[1]);
        assert_eq!(manager.session_count(), 0);

        // The manager keeps working afterwards
        let recorder = Arc::new(Recorder::default());
        manager.submit(pings(1), info(), AuthInfo::None, recorder.clone());
        assert_eq!(*recorder.events.lock(), vec!["progress 1", "result DONE"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_job_on_default_schedulers() {
        let manager = ConnectionManager::builder(Arc::new(StubFactory::default()))
            .settings(CryptoSettings::fast())
            .build()
            .unwrap();
        let outcome = manager
            .run(JobChain::new(Job::Custom(Box::new(Broken))), info(), AuthInfo::None)
            .await;
        assert!(matches!(outcome, Err(SyncError::JobPanicked(_))));
    }

    #[test]
    fn test_slow_observer_does_not_stall_chain() {
        struct Gate {
            open: Mutex<std_mpsc::Receiver<()>>,
            events: Mutex<std_mpsc::Sender<String>>,
        }

        impl Gate {
            fn record(&self, event: String) {
                let _ = self.events.lock().send(event);
            }
        }

        impl JobObserver for Gate {
            fn on_progress(&self, progress: ChainProgress) {
                if progress.step == 1 {
                    let _ = self.open.lock().recv_timeout(Duration::from_secs(5));
                }
                self.record(format!("progress {}", progress.step));
            }

            fn on_result(&self, result: JobResult) {
                self.record(format!("result {}", result.status));
            }

            fn on_exception(&self, error: SyncError) {
                self.record(format!("exception {}", error));
            }
        }

        let (open_tx, open_rx) = std_mpsc::channel();
        let (events_tx, events_rx) = std_mpsc::channel();
        let factory = Arc::new(StubFactory::default());
        let manager = manager(
            factory.clone(),
            Arc::new(InlineScheduler),
            Arc::new(NewThreadScheduler::new("observer-test")),
        );
        let gate = Arc::new(Gate {
            open: Mutex::new(open_rx),
            events: Mutex::new(events_tx),
        });

        // Inline start: submit returns once the whole chain has run
        manager.submit(pings(3), info(), AuthInfo::None, gate);
        assert_eq!(factory.transport.calls.lock().len(), 3);

        open_tx.send(()).unwrap();
        let events: Vec<String> = (0..4)
            .map(|_| events_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(
            events,
            vec!["progress 1", "progress 2", "progress 3", "result DONE"]
        );
    }
}
