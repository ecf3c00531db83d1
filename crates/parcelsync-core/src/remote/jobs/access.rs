//! Token registration (owner side) and access requests (grantee side)

use bytes::Bytes;

use super::{standard_result, to_params};
use crate::access::AccessToken;
use crate::error::{SyncError, SyncResult};
use crate::identity::{ContactPrivate, ContactPublic};
use crate::remote::params::{AccessRequestParams, RegisterAccessTokenParams};
use crate::remote::rpc::methods;
use crate::remote::{
    JobContext, JobResult, OutgoingRequest, RemoteJob, ResultData, RpcResponse, StepInfo,
};

/// Owner registers a token so the grantee can later claim it.
pub struct RegisterAccessTokenJob {
    token: AccessToken,
    grantee_key: [u8; 32],
}

impl RegisterAccessTokenJob {
    pub fn new(token: AccessToken, grantee: &ContactPublic) -> SyncResult<Self> {
        if &token.grantee != grantee.id() {
            return Err(SyncError::RequestConstruction(format!(
                "token is for {}, not {}",
                token.grantee.short(),
                grantee.id().short()
            )));
        }
        let grantee_key = grantee.verification_key(grantee.id())?.to_bytes();
        Ok(Self { token, grantee_key })
    }
}

impl RemoteJob for RegisterAccessTokenJob {
    fn name(&self) -> &'static str {
        "RegisterAccessToken"
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        if self.token.server_user != cx.connection.server_user {
            return Err(SyncError::RequestConstruction(format!(
                "token for {} sent to {}",
                self.token.server_user, cx.connection
            )));
        }
        let params = RegisterAccessTokenParams {
            token: self.token.clone(),
            grantee_key: hex::encode(self.grantee_key),
        };
        Ok(OutgoingRequest::new(
            methods::REGISTER_ACCESS_TOKEN,
            to_params(&params)?,
        ))
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
        result
            .with_data(ResultData::TokenRegistered(self.token.clone()))
            .continue_if(step.has_follow_up)
    }
}

/// Grantee proves possession of a token; the server adds it to the session.
pub struct AccessRequestJob {
    token: AccessToken,
    me: ContactPrivate,
}

impl AccessRequestJob {
    pub fn new(token: AccessToken, me: ContactPrivate) -> Self {
        Self { token, me }
    }
}

impl RemoteJob for AccessRequestJob {
    fn name(&self) -> &'static str {
        "AccessRequest"
    }

    fn build_request(&mut self, cx: &JobContext) -> SyncResult<OutgoingRequest> {
        if self.token.server_user != cx.connection.server_user {
            return Err(SyncError::RequestConstruction(format!(
                "token for {} used against {}",
                self.token.server_user, cx.connection
            )));
        }
        if &self.token.grantee != self.me.id() {
            return Err(SyncError::RequestConstruction(
                "token was granted to another contact".to_string(),
            ));
        }
        let proof = AccessToken::access_proof_data(&self.token.id, &self.token.server_user);
        let params = AccessRequestParams {
            server_user: self.token.server_user.clone(),
            token_id: self.token.id.clone(),
            algorithm: cx.settings.signature,
            signature: hex::encode(self.me.sign(cx.settings.signature, &proof)),
        };
        Ok(OutgoingRequest::new(methods::ACCESS_REQUEST, to_params(&params)?))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessRights;
    use crate::crypto::CryptoContext;
    use crate::identity::verify_signature;
    use crate::remote::{ConnectionInfo, JobStatus};
    use crate::settings::CryptoSettings;

    #[test]
    fn test_access_request_signature_verifies() {
        let ctx = CryptoContext::new();
        let bob = ContactPrivate::generate(&ctx, None);
        let token = AccessToken::new(&ctx, "alice", "main", AccessRights::PULL, bob.id().clone());
        let cx = JobContext {
            crypto: ctx,
            settings: CryptoSettings::fast(),
            connection: ConnectionInfo::new("local", "alice"),
        };

        let mut job = AccessRequestJob::new(token.clone(), bob.clone());
        let request = job.build_request(&cx).unwrap();
        let params: AccessRequestParams = serde_json::from_value(request.params).unwrap();
        let signature = hex::decode(params.signature).unwrap();
        verify_signature(
            &bob.keys().verifying_key(),
            params.algorithm,
            &AccessToken::access_proof_data(&token.id, "alice"),
            &signature,
        )
        .unwrap();
    }

    #[test]
    fn test_access_request_rejects_wrong_server() {
        let ctx = CryptoContext::new();
        let bob = ContactPrivate::generate(&ctx, None);
        let token = AccessToken::new(&ctx, "alice", "main", AccessRights::PULL, bob.id().clone());
        let cx = JobContext {
            crypto: ctx,
            settings: CryptoSettings::fast(),
            connection: ConnectionInfo::new("local", "carol"),
        };
        let mut job = AccessRequestJob::new(token, bob);
        assert!(matches!(
            job.build_request(&cx),
            Err(SyncError::RequestConstruction(_))
        ));
    }

    #[test]
    fn test_register_requires_matching_grantee() {
        let ctx = CryptoContext::new();
        let bob = ContactPrivate::generate(&ctx, None);
        let eve = ContactPrivate::generate(&ctx, None);
        let token = AccessToken::new(&ctx, "alice", "main", AccessRights::PULL, bob.id().clone());
        assert!(RegisterAccessTokenJob::new(token.clone(), eve.public()).is_err());
        assert!(RegisterAccessTokenJob::new(token, bob.public()).is_ok());
    }

    #[test]
    fn test_register_carries_token_on_success() {
        let ctx = CryptoContext::new();
        let bob = ContactPrivate::generate(&ctx, None);
        let token = AccessToken::new(&ctx, "alice", "main", AccessRights::ALL, bob.id().clone());
        let mut job = RegisterAccessTokenJob::new(token.clone(), bob.public()).unwrap();
        let response = RpcResponse::new(1, JobStatus::Done, "registered");
        let result = job.interpret_response(&response, None, StepInfo { has_follow_up: true });
        assert_eq!(result.status, JobStatus::FollowUpJob);
        assert_eq!(result.data, Some(ResultData::TokenRegistered(token)));
    }
}
