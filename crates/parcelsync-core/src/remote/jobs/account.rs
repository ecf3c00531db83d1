//! Liveness, account creation and two-step login

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use super::{parse_result, standard_result, to_params};
use crate::error::{SyncError, SyncResult};
use crate::remote::params::{CreateAccountParams, LoginParamsResult, LoginRequestParams, UserParams};
use crate::remote::rpc::methods;
use crate::remote::{
    ErrorCause, Job, JobContext, JobResult, JobStatus, OutgoingRequest, RemoteJob, RpcResponse,
    StepInfo,
};

/// Liveness probe.
#[derive(Debug, Default)]
pub struct PingJob;

impl PingJob {
    pub fn new() -> Self {
        PingJob
    }
}

impl RemoteJob for PingJob {
    fn name(&self) -> &'static str {
        "Ping"
    }

    fn build_request(&mut self, _cx: &JobContext) -> SyncResult<OutgoingRequest> {
        Ok(OutgoingRequest::new(methods::PING, Value::Null))
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

/// Register a new account; the server only ever sees a salted KDF hash.
pub struct CreateAccountJob {
    user: String,
    password: String,
}

impl CreateAccountJob {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl RemoteJob for CreateAccountJob {
    fn name(&self) -> &'static str {
        "CreateAccount"
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        if self.user.is_empty() {
            return Err(SyncError::RequestConstruction("user name is empty".to_string()));
        }
        let salt = cx.crypto.generate_salt();
        let password_hash = cx
            .crypto
            .derive_password_hash(&self.password, &salt, &cx.settings)?;
        let params = CreateAccountParams {
            user: self.user.clone(),
            password_hash,
            salt: hex::encode(salt),
            kdf: cx.settings.kdf,
            kdf_iterations: cx.settings.kdf_iterations,
        };
        Ok(OutgoingRequest::new(methods::CREATE_ACCOUNT, to_params(&params)?))
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

/// First login step: fetch salt and KDF parameters, then nominate [`LoginJob`].
pub struct LoginParamsJob {
    user: String,
    password: Option<String>,
    follow_up: Option<LoginJob>,
}

impl LoginParamsJob {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
            follow_up: None,
        }
    }
}

impl RemoteJob for LoginParamsJob {
    fn name(&self) -> &'static str {
        "LoginParams"
    }

    fn build_request(&mut self, _cx: &JobContext) -> SyncResult<OutgoingRequest> {
        if self.password.is_none() {
            return Err(SyncError::RequestConstruction(
                "login parameters already consumed".to_string(),
            ));
        }
        let params = UserParams {
            user: self.user.clone(),
        };
        Ok(OutgoingRequest::new(methods::LOGIN_PARAMS, to_params(&params)?))
    }

    fn interpret_response(
        &mut self,
        response: &RpcResponse,
        _data: Option<Bytes>,
        step: StepInfo,
    ) -> JobResult {
        let result = standard_result(response, step);
        if result.status != JobStatus::Done {
            return result;
        }
        let params: LoginParamsResult = match parse_result(response) {
            Ok(params) => params,
            Err(failure) => return failure,
        };
        let salt = match hex::decode(&params.salt) {
            Ok(salt) => salt,
            Err(e) => {
                return JobResult::failed(ErrorCause::Protocol, format!("salt is not hex: {}", e))
            }
        };
        let Some(password) = self.password.take() else {
            return JobResult::failed(ErrorCause::Protocol, "login parameters already consumed");
        };
        debug!(user = %self.user, iterations = params.kdf_iterations, "Login parameters received");
        self.follow_up = Some(LoginJob {
            user: self.user.clone(),
            password,
            salt,
            kdf_iterations: params.kdf_iterations,
        });
        JobResult::follow_up("login parameters received")
    }

    fn take_follow_up(&mut self) -> Option<Job> {
        self.follow_up.take().map(Job::Login)
    }
}

/// Second login step: prove knowledge of the password.
pub struct LoginJob {
    user: String,
    password: String,
    salt: Vec<u8>,
    kdf_iterations: u32,
}

impl RemoteJob for LoginJob {
    fn name(&self) -> &'static str {
        "Login"
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        let mut settings = cx.settings;
        settings.kdf_iterations = self.kdf_iterations;
        let password_hash = cx
            .crypto
            .derive_password_hash(&self.password, &self.salt, &settings)?;
        let params = LoginRequestParams {
            user: self.user.clone(),
            password_hash,
        };
        Ok(OutgoingRequest::new(methods::LOGIN, to_params(&params)?))
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
