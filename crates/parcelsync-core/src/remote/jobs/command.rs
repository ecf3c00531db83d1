//! Inbox commands: deliver to a user, drain your own

use bytes::Bytes;
use serde_json::Value;

use super::{parse_result, standard_result, to_params};
use crate::envelope::EnvelopeWriter;
use crate::error::{SyncError, SyncResult};
use crate::remote::params::{decode_command_batch, FetchCommandsResult, SendCommandParams};
use crate::remote::rpc::methods;
use crate::remote::{
    ErrorCause, JobContext, JobResult, OutgoingRequest, RemoteJob, ResultData,
    RpcResponse, StepInfo,
};

/// Post an enveloped command into `receiver`'s inbox on the connected server.
pub struct SendCommandJob {
    receiver: String,
    payload: Option<Vec<u8>>,
    writer: Option<Box<dyn EnvelopeWriter>>,
}

impl SendCommandJob {
    /// `payload` is packed by `writer` when the request is sent.
    pub fn new(
        receiver: impl Into<String>,
        payload: Vec<u8>,
        writer: Box<dyn EnvelopeWriter>,
    ) -> Self {
        Self {
            receiver: receiver.into(),
            payload: Some(payload),
            writer: Some(writer),
        }
    }
}

impl RemoteJob for SendCommandJob {
    fn name(&self) -> &'static str {
        "SendCommand"
    }

    fn build_request(&mut self, _cx: &JobContext) -> SyncResult<OutgoingRequest> {
        let payload = self.payload.take().ok_or_else(|| {
            SyncError::RequestConstruction("command payload already sent".to_string())
        })?;
        let params = SendCommandParams {
            receiver: self.receiver.clone(),
        };
        Ok(OutgoingRequest::new(methods::SEND_COMMAND, to_params(&params)?).with_data(payload))
    }

    fn request_envelope(&mut self, _cx: &JobContext) -> SyncResult<Option<Box<dyn EnvelopeWriter>>> {
        self.writer
            .take()
            .map(Some)
            .ok_or_else(|| SyncError::RequestConstruction("command envelope already used".to_string()))
    }

    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        _data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult {
        standard_result(response, step).continue_if(step.has_follow_up)
    }
}

/// Drain the authenticated user's inbox.
#[derive(Debug, Default)]
pub struct FetchCommandsJob;

impl FetchCommandsJob {
    pub fn new() -> Self {
        FetchCommandsJob
    }
}

impl RemoteJob for FetchCommandsJob {
    fn name(&self) -> &'static str {
        "FetchCommands"
    }

    fn build_request(&mut self, _cx: &JobContext) -> SyncResult<OutgoingRequest> {
        Ok(OutgoingRequest::new(methods::FETCH_COMMANDS, Value::Null))
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
        let summary: FetchCommandsResult = match parse_result(response) {
            Ok(summary) => summary,
            Err(failure) => return failure,
        };
        let commands = match data {
            Some(data) => match decode_command_batch(&data) {
                Ok(batch) => batch.into_iter().map(Bytes::from).collect::<Vec<_>>(),
                Err(e) => return JobResult::failed(ErrorCause::Protocol, e.to_string()),
            },
            None => Vec::new(),
        };
        if commands.len() != summary.count {
            return JobResult::failed(
                ErrorCause::Protocol,
                format!(
                    "server announced {} commands but sent {}",
                    summary.count,
                    commands.len()
                ),
            );
        }
        result
            .with_data(ResultData::Commands(commands))
            .continue_if(step.has_follow_up)
    }
}
