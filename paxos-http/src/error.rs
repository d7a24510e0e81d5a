use std::path::PathBuf;

use thiserror::Error;

/// Failure to get any protocol answer out of a peer.
///
/// A NACK is an answer and never shows up here.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("peer {peer} did not answer within {timeout_ms}ms")]
    Timeout { peer: String, timeout_ms: u64 },

    #[error("peer {peer} answered with HTTP status {status}")]
    Status { peer: String, status: u16 },

    #[error("peer {peer} sent an undecodable body: {reason}")]
    Decode { peer: String, reason: String },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] yaml_rust::ScanError),

    #[error("config file is empty")]
    Empty,

    #[error("missing required field: {0}")]
    Missing(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid role `{0}`, expected proposer, acceptor or learner")]
    UnknownRole(String),

    #[error("node_id {0} is not in the config")]
    UnknownNode(u64),
}

/// Request body that could not be turned into a protocol message.
#[derive(Debug, Error)]
#[error("malformed request body: {0}")]
pub struct RequestError(#[from] pub serde_json::Error);
