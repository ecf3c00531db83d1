//! Client job catalogue
//!
//! | Job                 | Method                | Auth  | Follow-up        |
//! |---------------------|-----------------------|-------|------------------|
//! | Ping                | `ping`                | no    |                  |
//! | CreateAccount       | `createAccount`       | no    |                  |
//! | LoginParams         | `loginParams`         | no    | nominates Login  |
//! | Login               | `login`               | no    |                  |
//! | SendCommand         | `sendCommand`         | no    |                  |
//! | FetchCommands       | `fetchCommands`       | owner |                  |
//! | RegisterAccessToken | `registerAccessToken` | owner |                  |
//! | AccessRequest       | `accessRequest`       | token |                  |
//! | Push / Pull         | `push` / `pull`       | PUSH / PULL |            |
//! | Watch               | `watch`               | PULL  |                  |

mod access;
mod account;
mod branch;
mod command;

pub use access::{AccessRequestJob, RegisterAccessTokenJob};
pub use account::{CreateAccountJob, LoginJob, LoginParamsJob, PingJob};
pub use branch::{PullJob, PushJob, WatchJob};
pub use command::{FetchCommandsJob, SendCommandJob};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::SyncResult;
use crate::remote::{ErrorCause, Job, JobResult, JobStatus, RpcResponse, StepInfo};

/// Map a response header to a result.
///
/// `FOLLOW_UP_JOB` from the server continues the chain only when a follow-up
/// is registered after this step; otherwise it is a chain integrity error.
pub(crate) fn standard_result(response: &RpcResponse, step: StepInfo) -> JobResult {
    match response.status {
        JobStatus::FollowUpJob if !step.has_follow_up => JobResult::failed(
            ErrorCause::ChainIntegrity,
            format!(
                "server requested a follow-up job but none is registered: {}",
                response.message
            ),
        ),
        status => JobResult::new(status, response.message.clone()),
    }
}

/// Deserialize the result object, or describe why it could not be.
pub(crate) fn parse_result<T: DeserializeOwned>(response: &RpcResponse) -> Result<T, JobResult> {
    response
        .result_as()
        .map_err(|e| JobResult::failed(ErrorCause::Protocol, e.to_string()))
}

pub(crate) fn to_params<T: Serialize>(params: &T) -> SyncResult<Value> {
    Ok(serde_json::to_value(params)?)
}

macro_rules! impl_into_job {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Job {
                fn from(job: $ty) -> Self {
                    Job::$variant(job)
                }
            }
        )*
    };
}

impl_into_job! {
    PingJob => Ping,
    CreateAccountJob => CreateAccount,
    LoginParamsJob => LoginParams,
    LoginJob => Login,
    SendCommandJob => SendCommand,
    FetchCommandsJob => FetchCommands,
    RegisterAccessTokenJob => RegisterAccessToken,
    AccessRequestJob => AccessRequest,
    PushJob => Push,
    PullJob => Pull,
    WatchJob => Watch,
}
