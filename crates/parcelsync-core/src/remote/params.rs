//! Parameter and result objects exchanged by jobs and portal handlers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::AccessToken;
use crate::error::{SyncError, SyncResult};
use crate::settings::{KdfAlgorithm, SignatureAlgorithm};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub user: String,
    pub password_hash: String,
    /// hex
    pub salt: String,
    pub kdf: KdfAlgorithm,
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserParams {
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginParamsResult {
    /// hex
    pub salt: String,
    pub kdf: KdfAlgorithm,
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequestParams {
    pub user: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendCommandParams {
    pub receiver: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCommandsResult {
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAccessTokenParams {
    pub token: AccessToken,
    /// hex of the grantee's Ed25519 verifying key
    pub grantee_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequestParams {
    pub server_user: String,
    pub token_id: String,
    pub algorithm: SignatureAlgorithm,
    /// hex
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchParams {
    pub server_user: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushParams {
    pub server_user: String,
    pub branch: String,
    /// Reject the push if the remote tip moved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_tip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipResult {
    pub tip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchParams {
    pub server_user: String,
    /// Branch name to the tip the client last saw
    pub branches: BTreeMap<String, Option<String>>,
}

/// Encode inbox entries for the binary side channel.
pub fn encode_command_batch(commands: &[Vec<u8>]) -> SyncResult<Vec<u8>> {
    Ok(postcard::to_allocvec(commands)?)
}

pub fn decode_command_batch(data: &[u8]) -> SyncResult<Vec<Vec<u8>>> {
    postcard::from_bytes(data)
        .map_err(|e| SyncError::Protocol(format!("bad command batch: {}", e)))
}
