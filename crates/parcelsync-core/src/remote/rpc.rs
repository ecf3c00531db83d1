//! JSON-RPC messages with a binary side channel
//!
//! ## Frame Format
//!
//! ```text
//! +--------------+-------------+------+--------------+-----------+
//! | header_len   | header JSON | flag | data_len     | data      |
//! | (u32 LE)     | (variable)  | (u8) | (u32 LE)     | (variable)|
//! +--------------+-------------+------+--------------+-----------+
//!                                       only present when flag == 1
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::remote::JobStatus;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method names understood by the portal
pub mod methods {
    pub const PING: &str = "ping";
    pub const CREATE_ACCOUNT: &str = "createAccount";
    pub const LOGIN_PARAMS: &str = "loginParams";
    pub const LOGIN: &str = "login";
    pub const SEND_COMMAND: &str = "sendCommand";
    pub const FETCH_COMMANDS: &str = "fetchCommands";
    pub const REGISTER_ACCESS_TOKEN: &str = "registerAccessToken";
    pub const ACCESS_REQUEST: &str = "accessRequest";
    pub const PUSH: &str = "push";
    pub const PULL: &str = "pull";
    pub const WATCH: &str = "watch";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Response header. `error` carries an out-of-band server error unrelated to the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    pub status: JobStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn new(id: u64, status: JobStatus, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            status,
            message: message.into(),
            result: Value::Null,
            error: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    /// Deserialize the `result` object into a job-specific type.
    pub fn result_as<T: serde::de::DeserializeOwned>(&self) -> SyncResult<T> {
        serde_json::from_value(self.result.clone()).map_err(|e| {
            SyncError::Protocol(format!("unexpected result shape for id {}: {}", self.id, e))
        })
    }
}

/// One message on the wire: a JSON header plus optional binary data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMessage {
    pub header: String,
    pub data: Option<Bytes>,
}

impl RpcMessage {
    pub fn request(request: &RpcRequest, data: Option<Bytes>) -> SyncResult<Self> {
        Ok(Self {
            header: serde_json::to_string(request)?,
            data,
        })
    }

    pub fn response(response: &RpcResponse, data: Option<Bytes>) -> SyncResult<Self> {
        Ok(Self {
            header: serde_json::to_string(response)?,
            data,
        })
    }

    pub fn parse_request(&self) -> SyncResult<RpcRequest> {
        serde_json::from_str(&self.header)
            .map_err(|e| SyncError::Protocol(format!("invalid request: {}", e)))
    }

    pub fn parse_response(&self) -> SyncResult<RpcResponse> {
        serde_json::from_str(&self.header)
            .map_err(|e| SyncError::Protocol(format!("invalid response: {}", e)))
    }

    pub fn to_frame(&self) -> Vec<u8> {
        let header = self.header.as_bytes();
        let data_len = self.data.as_ref().map(|d| d.len() + 4).unwrap_or(0);
        let mut frame = Vec::with_capacity(4 + header.len() + 1 + data_len);
        frame.extend_from_slice(&(header.len() as u32).to_le_bytes());
        frame.extend_from_slice(header);
        match &self.data {
            Some(data) => {
                frame.push(1);
                frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
                frame.extend_from_slice(data);
            }
            None => frame.push(0),
        }
        frame
    }

    pub fn from_frame(frame: &[u8]) -> SyncResult<Self> {
        let mut cursor = FrameCursor { frame, pos: 0 };
        let header_len = cursor.read_u32()? as usize;
        let header = std::str::from_utf8(cursor.take(header_len)?)
            .map_err(|e| SyncError::Framing(format!("header is not UTF-8: {}", e)))?
            .to_string();
        let data = match cursor.take(1)?[0] {
            0 => None,
            1 => {
                let len = cursor.read_u32()? as usize;
                Some(Bytes::copy_from_slice(cursor.take(len)?))
            }
            flag => return Err(SyncError::Framing(format!("bad data flag {}", flag))),
        };
        if cursor.pos != frame.len() {
            return Err(SyncError::Framing(format!(
                "{} trailing bytes",
                frame.len() - cursor.pos
            )));
        }
        Ok(Self { header, data })
    }
}

struct FrameCursor<'a> {
    frame: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    fn take(&mut self, len: usize) -> SyncResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.frame.len())
            .ok_or_else(|| {
                SyncError::Framing(format!(
                    "frame truncated: need {} bytes at offset {}, have {}",
                    len,
                    self.pos,
                    self.frame.len()
                ))
            })?;
        let slice = &self.frame[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> SyncResult<u32> {
        let bytes = self.take(4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }
}
