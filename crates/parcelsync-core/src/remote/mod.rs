//! Remote job execution
//!
//! ## Submission Flow
//!
//! ```text
//! caller ──submit(chain, info, auth, observer)──► ConnectionManager
//!                                                   │ start scheduler
//!                                                   ▼
//!                               session (at most once per connection)
//!                                                   │
//!                                 run_chain ──► Transport ──► server
//!                                                   │
//!                                                   ▼ observer scheduler
//!                          on_progress* then on_result | on_exception
//! ```

pub mod connection;
mod job;
pub mod jobs;
pub mod params;
mod result;
pub mod retry;
pub mod rpc;
pub mod scheduler;
mod transport;

pub use connection::{
    ChannelObserver, ConnectionManager, JobObserver, Submission, TaskEvent,
};
pub use job::{
    run_chain, CancelToken, ChainProgress, ErrorCallback, Job, JobChain, JobContext,
    OutgoingRequest, RemoteJob, StepInfo,
};
pub(crate) use job::cause_of;
pub use result::{BranchSnapshot, ErrorCause, JobResult, JobStatus, ResultData, WatchResult};
pub use retry::{poll_with_retry, RetryPolicy};
pub use rpc::{RpcMessage, RpcRequest, RpcResponse};
pub use scheduler::{
    InlineScheduler, LooperScheduler, NewThreadScheduler, Scheduler, TokioBlockingScheduler,
};
pub use transport::{AuthInfo, ConnectionInfo, Transport, TransportFactory};
