//! Built-in request handlers
//!
//! Branch handlers obtain a [`BranchAccess`](crate::access::BranchAccess) from
//! [`AccessControl`] before touching storage; a denial is answered with
//! `ACCESS_DENIED` and the store is never called.

use bytes::Bytes;
use ed25519_dalek::VerifyingKey;
use tracing::{debug, info};

use super::portal::{parse_params, Portal, Reply, ServerState};
use super::Session;
use crate::access::{AccessControl, AccessRight, AccessToken};
use crate::error::{SyncError, SyncResult};
use crate::identity::{verify_signature, KeyId};
use crate::remote::params::{
    encode_command_batch, AccessRequestParams, BranchParams, CreateAccountParams,
    FetchCommandsResult, LoginParamsResult, LoginRequestParams, PushParams,
    RegisterAccessTokenParams, SendCommandParams, TipResult, UserParams, WatchParams,
};
use crate::remote::rpc::methods;
use crate::remote::{RpcRequest, WatchResult};

pub(crate) fn register_all(portal: &mut Portal) {
    portal.register(methods::PING, ping);
    portal.register(methods::CREATE_ACCOUNT, create_account);
    portal.register(methods::LOGIN_PARAMS, login_params);
    portal.register(methods::LOGIN, login);
    portal.register(methods::SEND_COMMAND, send_command);
    portal.register(methods::FETCH_COMMANDS, fetch_commands);
    portal.register(methods::REGISTER_ACCESS_TOKEN, register_access_token);
    portal.register(methods::ACCESS_REQUEST, access_request);
    portal.register(methods::PUSH, push);
    portal.register(methods::PULL, pull);
    portal.register(methods::WATCH, watch);
}

fn ping(_: &ServerState, _: &mut Session, _: &RpcRequest, _: Option<Bytes>) -> SyncResult<Reply> {
    Ok(Reply::done("pong"))
}

fn create_account(
    state: &ServerState,
    _: &mut Session,
    request: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: CreateAccountParams = parse_params(request)?;
    let user = params.user.clone();
    match state.accounts.create(params) {
        Ok(()) => Ok(Reply::done(format!("account {} created", user))),
        Err(SyncError::Storage(_)) => Ok(Reply::error(format!("account {} already exists", user))),
        Err(e) => Err(e),
    }
}

fn login_params(
    state: &ServerState,
    _: &mut Session,
    request: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: UserParams = parse_params(request)?;
    let Some(account) = state.accounts.get(&params.user) else {
        return Ok(Reply::error("unknown user"));
    };
    Reply::done("").with_result(&LoginParamsResult {
        salt: hex::encode(&account.salt),
        kdf: account.kdf,
        kdf_iterations: account.kdf_iterations,
    })
}

fn login(
    state: &ServerState,
    session: &mut Session,
    request: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: LoginRequestParams = parse_params(request)?;
    if state.accounts.verify(&params.user, &params.password_hash) {
        info!(session = %session.id(), user = %params.user, "Session logged in");
        session.login(params.user);
        Ok(Reply::done("logged in"))
    } else {
        debug!(session = %session.id(), user = %params.user, "Login refused");
        session.logout();
        Ok(Reply::access_denied("login failed"))
    }
}

fn send_command(
    state: &ServerState,
    _: &mut Session,
    request: &RpcRequest,
    data: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: SendCommandParams = parse_params(request)?;
    if !state.accounts.exists(&params.receiver) {
        return Ok(Reply::error(format!("unknown receiver {}", params.receiver)));
    }
    let Some(command) = data else {
        return Ok(Reply::error("command payload missing"));
    };
    state.inboxes.push(&params.receiver, command);
    Ok(Reply::done("command delivered"))
}

fn fetch_commands(
    state: &ServerState,
    session: &mut Session,
    _: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let Some(user) = session.account_user() else {
        return Ok(Reply::access_denied("not logged in"));
    };
    let commands: Vec<Vec<u8>> = state
        .inboxes
        .drain(user)
        .into_iter()
        .map(|command| command.to_vec())
        .collect();
    let reply = Reply::done("").with_result(&FetchCommandsResult {
        count: commands.len(),
    })?;
    if commands.is_empty() {
        return Ok(reply);
    }
    Ok(reply.with_data(Bytes::from(encode_command_batch(&commands)?)))
}

fn register_access_token(
    state: &ServerState,
    session: &mut Session,
    request: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: RegisterAccessTokenParams = parse_params(request)?;
    let token = params.token;
    if !session.is_account_user(&token.server_user) {
        return Ok(Reply::access_denied(format!(
            "only {} may grant access to its branches",
            token.server_user
        )));
    }
    if token.rights.is_empty() {
        return Ok(Reply::error("token grants no rights"));
    }
    let grantee_key = decode_key(&params.grantee_key)?;
    if KeyId::from_public_key(&grantee_key) != token.grantee {
        return Ok(Reply::error("grantee key does not match token"));
    }
    match state.tokens.register(token, grantee_key) {
        Ok(()) => Ok(Reply::done("access token registered")),
        Err(SyncError::Storage(message)) => Ok(Reply::error(message)),
        Err(e) => Err(e),
    }
}

fn access_request(
    state: &ServerState,
    session: &mut Session,
    request: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: AccessRequestParams = parse_params(request)?;
    let Some(registered) = state.tokens.get(&params.server_user, &params.token_id) else {
        return Ok(Reply::access_denied("unknown access token"));
    };
    let signature = hex::decode(&params.signature)
        .map_err(|e| SyncError::Protocol(format!("signature is not hex: {}", e)))?;
    let key = VerifyingKey::from_bytes(&registered.grantee_key)
        .map_err(|e| SyncError::InvalidKey(format!("stored grantee key: {}", e)))?;
    let proof = AccessToken::access_proof_data(&params.token_id, &params.server_user);
    if verify_signature(&key, params.algorithm, &proof, &signature).is_err() {
        debug!(session = %session.id(), token = %params.token_id, "Token proof rejected");
        return Ok(Reply::access_denied("invalid token proof"));
    }
    info!(
        session = %session.id(),
        server_user = %params.server_user,
        branch = %registered.token.branch,
        rights = %registered.token.rights,
        "Access token accepted"
    );
    session.grant_token(params.token_id);
    Ok(Reply::done("access granted"))
}

fn push(
    state: &ServerState,
    session: &mut Session,
    request: &RpcRequest,
    data: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: PushParams = parse_params(request)?;
    let access = match AccessControl::new(session, &state.tokens).branch(
        &params.server_user,
        &params.branch,
        AccessRight::Push,
    ) {
        Ok(access) => access,
        Err(denied) => return Ok(Reply::access_denied(denied.to_string())),
    };
    let Some(data) = data else {
        return Ok(Reply::error("push without data"));
    };
    match state
        .branches
        .push(&access, data, params.expected_tip.as_deref())
    {
        Ok(tip) => Reply::done("pushed").with_result(&TipResult { tip: Some(tip) }),
        Err(SyncError::Storage(message)) => Ok(Reply::error(message)),
        Err(e) => Err(e),
    }
}

fn pull(
    state: &ServerState,
    session: &mut Session,
    request: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: BranchParams = parse_params(request)?;
    let access = match AccessControl::new(session, &state.tokens).branch(
        &params.server_user,
        &params.branch,
        AccessRight::Pull,
    ) {
        Ok(access) => access,
        Err(denied) => return Ok(Reply::access_denied(denied.to_string())),
    };
    match state.branches.pull(&access)? {
        Some(stored) => Ok(Reply::done("")
            .with_result(&TipResult {
                tip: Some(stored.tip),
            })?
            .with_data(stored.data)),
        None => Reply::done("branch is empty").with_result(&TipResult { tip: None }),
    }
}

fn watch(
    state: &ServerState,
    session: &mut Session,
    request: &RpcRequest,
    _: Option<Bytes>,
) -> SyncResult<Reply> {
    let params: WatchParams = parse_params(request)?;
    let control = AccessControl::new(session, &state.tokens);
    let mut updated = Vec::new();
    for (branch, known_tip) in &params.branches {
        let access = match control.branch(&params.server_user, branch, AccessRight::Pull) {
            Ok(access) => access,
            Err(denied) => return Ok(Reply::access_denied(denied.to_string())),
        };
        if state.branches.tip(&access)? != *known_tip {
            updated.push(branch.clone());
        }
    }
    Reply::done("").with_result(&WatchResult { updated })
}

fn decode_key(key: &str) -> SyncResult<[u8; 32]> {
    let bytes =
        hex::decode(key).map_err(|e| SyncError::Protocol(format!("key is not hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| SyncError::Protocol("key must be 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessRights;
    use crate::crypto::CryptoContext;
    use crate::identity::ContactPrivate;
    use crate::remote::{JobStatus, RpcMessage, RpcResponse};
    use crate::settings::{CryptoSettings, KdfAlgorithm};
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct Fixture {
        portal: Portal,
        ctx: CryptoContext,
    }

    impl Fixture {
        fn new() -> Self {
            let ctx = CryptoContext::new();
            let portal = Portal::new(Arc::new(ServerState::new(ctx.clone())));
            let fixture = Self { portal, ctx };
            for user in ["alice", "bob"] {
                fixture.portal.state().accounts.create(CreateAccountParams {
                    user: user.to_string(),
                    password_hash: format!("{}-hash", user),
                    salt: "00".to_string(),
                    kdf: KdfAlgorithm::Pbkdf2HmacSha256,
                    kdf_iterations: 16,
                })
                .unwrap();
            }
            fixture
        }

        fn call(
            &self,
            session: &mut Session,
            method: &str,
            params: Value,
            data: Option<&'static [u8]>,
        ) -> (RpcResponse, Option<Bytes>) {
            let message = RpcMessage::request(
                &RpcRequest::new(1, method, params),
                data.map(Bytes::from_static),
            )
            .unwrap();
            let reply = self.portal.handle(session, message).unwrap();
            (reply.parse_response().unwrap(), reply.data)
        }

        fn logged_in(&self, user: &str) -> Session {
            let mut session = Session::new();
            let (response, _) = self.call(
                &mut session,
                methods::LOGIN,
                json!({"user": user, "password_hash": format!("{}-hash", user)}),
                None,
            );
            assert_eq!(response.status, JobStatus::Done);
            session
        }
    }

    #[test]
    fn test_login_wrong_hash_denied() {
        let fx = Fixture::new();
        let mut session = Session::new();
        let (response, _) = fx.call(
            &mut session,
            methods::LOGIN,
            json!({"user": "alice", "password_hash": "nope"}),
            None,
        );
        assert_eq!(response.status, JobStatus::AccessDenied);
        assert!(session.account_user().is_none());
    }

    #[test]
    fn test_inbox_requires_login() {
        let fx = Fixture::new();
        let mut anonymous = Session::new();
        let (response, _) = fx.call(
            &mut anonymous,
            methods::SEND_COMMAND,
            json!({"receiver": "bob"}),
            Some(b"hello"),
        );
        assert_eq!(response.status, JobStatus::Done);

        let (response, _) = fx.call(&mut anonymous, methods::FETCH_COMMANDS, Value::Null, None);
        assert_eq!(response.status, JobStatus::AccessDenied);

        let mut bob = fx.logged_in("bob");
        let (response, data) = fx.call(&mut bob, methods::FETCH_COMMANDS, Value::Null, None);
        assert_eq!(response.result, json!({"count": 1}));
        let batch = crate::remote::params::decode_command_batch(&data.unwrap()).unwrap();
        assert_eq!(batch, vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_pull_without_token_denied() {
        let fx = Fixture::new();
        let mut bob = fx.logged_in("bob");
        let (response, data) = fx.call(
            &mut bob,
            methods::PULL,
            json!({"server_user": "alice", "branch": "main"}),
            None,
        );
        assert_eq!(response.status, JobStatus::AccessDenied);
        assert!(data.is_none());
    }

    #[test]
    fn test_token_flow_and_revocation() {
        let fx = Fixture::new();
        let grantee = ContactPrivate::generate(&fx.ctx, None);
        let token = AccessToken::new(
            &fx.ctx,
            "alice",
            "main",
            AccessRights::PULL,
            grantee.id().clone(),
        );

        let mut alice = fx.logged_in("alice");
        let (response, _) = fx.call(
            &mut alice,
            methods::PUSH,
            json!({"server_user": "alice", "branch": "main"}),
            Some(b"pack-1"),
        );
        assert_eq!(response.status, JobStatus::Done);
        let (response, _) = fx.call(
            &mut alice,
            methods::REGISTER_ACCESS_TOKEN,
            json!({
                "token": token,
                "grantee_key": hex::encode(grantee.keys().verifying_key().to_bytes()),
            }),
            None,
        );
        assert_eq!(response.status, JobStatus::Done);

        let mut bob = Session::new();
        let settings = CryptoSettings::fast();
        let proof = AccessToken::access_proof_data(&token.id, "alice");
        let (response, _) = fx.call(
            &mut bob,
            methods::ACCESS_REQUEST,
            json!({
                "server_user": "alice",
                "token_id": token.id,
                "algorithm": settings.signature,
                "signature": hex::encode(grantee.sign(settings.signature, &proof)),
            }),
            None,
        );
        assert_eq!(response.status, JobStatus::Done);

        let (response, data) = fx.call(
            &mut bob,
            methods::PULL,
            json!({"server_user": "alice", "branch": "main"}),
            None,
        );
        assert_eq!(response.status, JobStatus::Done);
        assert_eq!(data, Some(Bytes::from_static(b"pack-1")));

        let (response, _) = fx.call(
            &mut bob,
            methods::PUSH,
            json!({"server_user": "alice", "branch": "main"}),
            Some(b"evil"),
        );
        assert_eq!(response.status, JobStatus::AccessDenied);

        fx.portal.state().tokens.revoke("alice", &token.id);
        let (response, _) = fx.call(
            &mut bob,
            methods::PULL,
            json!({"server_user": "alice", "branch": "main"}),
            None,
        );
        assert_eq!(response.status, JobStatus::AccessDenied);
        assert!(response.error.unwrap().contains(&token.id));
    }

    #[test]
    fn test_forged_proof_denied() {
        let fx = Fixture::new();
        let grantee = ContactPrivate::generate(&fx.ctx, None);
        let thief = ContactPrivate::generate(&fx.ctx, None);
        let token = AccessToken::new(
            &fx.ctx,
            "alice",
            "main",
            AccessRights::PULL,
            grantee.id().clone(),
        );
        let mut alice = fx.logged_in("alice");
        fx.call(
            &mut alice,
            methods::REGISTER_ACCESS_TOKEN,
            json!({
                "token": token,
                "grantee_key": hex::encode(grantee.keys().verifying_key().to_bytes()),
            }),
            None,
        );

        let settings = CryptoSettings::fast();
        let proof = AccessToken::access_proof_data(&token.id, "alice");
        let mut eve = Session::new();
        let (response, _) = fx.call(
            &mut eve,
            methods::ACCESS_REQUEST,
            json!({
                "server_user": "alice",
                "token_id": token.id,
                "algorithm": settings.signature,
                "signature": hex::encode(thief.sign(settings.signature, &proof)),
            }),
            None,
        );
        assert_eq!(response.status, JobStatus::AccessDenied);
        assert_eq!(eve.token_ids().count(), 0);
    }

    #[test]
    fn test_only_owner_registers_tokens() {
        let fx = Fixture::new();
        let grantee = ContactPrivate::generate(&fx.ctx, None);
        let token = AccessToken::new(
            &fx.ctx,
            "alice",
            "main",
            AccessRights::ALL,
            grantee.id().clone(),
        );
        let mut bob = fx.logged_in("bob");
        let (response, _) = fx.call(
            &mut bob,
            methods::REGISTER_ACCESS_TOKEN,
            json!({
                "token": token,
                "grantee_key": hex::encode(grantee.keys().verifying_key().to_bytes()),
            }),
            None,
        );
        assert_eq!(response.status, JobStatus::AccessDenied);
    }

    #[test]
    fn test_watch_reports_changed_branches() {
        let fx = Fixture::new();
        let mut alice = fx.logged_in("alice");
        fx.call(
            &mut alice,
            methods::PUSH,
            json!({"server_user": "alice", "branch": "main"}),
            Some(b"v1"),
        );
        let tip = crate::storage::tip_of(b"v1");
        let (response, _) = fx.call(
            &mut alice,
            methods::WATCH,
            json!({
                "server_user": "alice",
                "branches": {"main": tip, "notes": null, "docs": "stale"}
            }),
            None,
        );
        assert_eq!(response.result, json!({"updated": ["docs"]}));
    }
}
