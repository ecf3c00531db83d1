//! Error types for parcelsync

use thiserror::Error;

/// Main error type for parcelsync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Signature or authentication check failed (bad signature, unknown signer)
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Decryption failed (wrong key, key mismatch, tampered ciphertext)
    #[error("Confidentiality error: {0}")]
    Confidentiality(String),

    /// A job could not build its request because required state is missing
    #[error("Request construction error: {0}")]
    RequestConstruction(String),

    /// The remote endpoint could not be reached
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The transport delivered bytes that could not be framed into a message
    #[error("Framing error: {0}")]
    Framing(String),

    /// Response had an unexpected or malformed shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A chain tried to continue without a registered follow-up job
    #[error("Chain integrity violation: {0}")]
    ChainIntegrity(String),

    /// The server answered, but not with `DONE`
    #[error("Job rejected: {0}")]
    Rejected(crate::remote::JobResult),

    /// A job panicked while the chain was running
    #[error("Job panicked: {0}")]
    JobPanicked(String),

    /// The submission was cancelled before it completed
    #[error("Submission cancelled")]
    Cancelled,

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation failed for a reason other than integrity/confidentiality
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Key material has the wrong shape or is unknown
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// True for failures of the transport itself (as opposed to a well-formed error response).
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Connectivity(_) | SyncError::Framing(_))
    }
}

impl From<postcard::Error> for SyncError {
    fn from(e: postcard::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
