//! Branch data exchange and remote status polling

use std::collections::BTreeMap;

use bytes::Bytes;

use super::{parse_result, standard_result, to_params};
use crate::error::{SyncError, SyncResult};
use crate::remote::params::{BranchParams, PushParams, TipResult, WatchParams};
use crate::remote::rpc::methods;
use crate::remote::{
    BranchSnapshot, ErrorCause, JobContext, JobResult, OutgoingRequest, RemoteJob,
    ResultData, RpcResponse, StepInfo, WatchResult,
};

/// Upload a pack to a branch of the connected server user.
pub struct PushJob {
    branch: String,
    data: Option<Vec<u8>>,
    expected_tip: Option<String>,
}

impl PushJob {
    pub fn new(branch: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            branch: branch.into(),
            data: Some(data),
            expected_tip: None,
        }
    }

    /// Fail instead of overwriting if the remote tip is not `tip`.
    pub fn expecting_tip(mut self, tip: Option<String>) -> Self {
        self.expected_tip = tip;
        self
    }
}

impl RemoteJob for PushJob {
    fn name(&self) -> &'static str {
        "Push"
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        let data = self
            .data
            .take()
            .ok_or_else(|| SyncError::RequestConstruction("push data already sent".to_string()))?;
        let params = PushParams {
            server_user: cx.connection.server_user.clone(),
            branch: self.branch.clone(),
            expected_tip: self.expected_tip.clone(),
        };
        Ok(OutgoingRequest::new(methods::PUSH, to_params(&params)?).with_data(data))
    }

    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        _data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult {
        let result = standard_result(response, step);
        if !result.proceeds() {
            return result;
        }
        match parse_result::<TipResult>(response) {
            Ok(TipResult { tip: Some(tip) }) => result
                .with_data(ResultData::Pushed {
                    branch: self.branch.clone(),
                    tip,
                })
                .continue_if(step.has_follow_up),
            Ok(TipResult { tip: None }) => {
                JobResult::failed(ErrorCause::Protocol, "push response carries no tip")
            }
            Err(failure) => failure,
        }
    }
}

/// Fetch the latest content of a branch.
pub struct PullJob {
    branch: String,
}

impl PullJob {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }
}

impl RemoteJob for PullJob {
    fn name(&self) -> &'static str {
        "Pull"
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        let params = BranchParams {
            server_user: cx.connection.server_user.clone(),
            branch: self.branch.clone(),
        };
        Ok(OutgoingRequest::new(methods::PULL, to_params(&params)?))
    }

    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult {
        let result = standard_result(response, step);
        if !result.proceeds() {
            return result;
        }
        let tip = match parse_result::<TipResult>(response) {
            Ok(TipResult { tip }) => tip,
            Err(failure) => return failure,
        };
        let snapshot = match (tip, data) {
            (Some(tip), Some(data)) => Some(BranchSnapshot {
                branch: self.branch.clone(),
                tip,
                data,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return JobResult::failed(ErrorCause::Protocol, "pull response has a tip but no data")
            }
            (None, Some(_)) => {
                return JobResult::failed(ErrorCause::Protocol, "pull response has data but no tip")
            }
        };
        result
            .with_data(ResultData::Pulled(snapshot))
            .continue_if(step.has_follow_up)
    }
}

/// Ask which branches changed relative to the tips the client knows.
pub struct WatchJob {
    branches: BTreeMap<String, Option<String>>,
}

impl WatchJob {
    pub fn new(branches: BTreeMap<String, Option<String>>) -> Self {
        Self { branches }
    }
}

impl RemoteJob for WatchJob {
    fn name(&self) -> &'static str {
        "Watch"
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        if self.branches.is_empty() {
            return Err(SyncError::RequestConstruction(
                "watch needs at least one branch".to_string(),
            ));
        }
        let params = WatchParams {
            server_user: cx.connection.server_user.clone(),
            branches: self.branches.clone(),
        };
        Ok(OutgoingRequest::new(methods::WATCH, to_params(&params)?))
    }

    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        _data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult {
        let result = standard_result(response, step);
        if !result.proceeds() {
            return result;
        }
        match parse_result::<WatchResult>(response) {
            Ok(watch) => result
                .with_data(ResultData::Watch(watch))
                .continue_if(step.has_follow_up),
            Err(failure) => failure,
        }
    }
}
