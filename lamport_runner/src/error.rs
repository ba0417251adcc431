// lamport_runner/src/error.rs
//! Error types, one enum per concern.
//!
//! Only [`NodeError`] ever stops a node. Send and wire errors are absorbed by
//! the task that produced them and surface as log lines and counters.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::PeerAddr;

/// Fatal node errors: startup bind, event log I/O, bad configuration.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to open event log {}: {source}", path.display())]
    LogOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write event log: {0}")]
    LogWrite(#[from] io::Error),

    #[error("failed to encode event record: {0}")]
    LogEncode(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("scheduler already stopped; no records may follow END")]
    AlreadyStopped,

    #[error("node task failed: {0}")]
    Task(String),
}

/// Outbound send failures. Logged and counted, never retried.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connect to {peer} failed: {source}")]
    Connect {
        peer: PeerAddr,
        #[source]
        source: io::Error,
    },

    #[error("connect to {peer} timed out")]
    ConnectTimeout { peer: PeerAddr },

    #[error("write to {peer} failed: {source}")]
    Write {
        peer: PeerAddr,
        #[source]
        source: io::Error,
    },

    #[error("write to {peer} timed out")]
    WriteTimeout { peer: PeerAddr },
}

/// A single inbound line that could not become a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("malformed timestamp line {0:?}")]
    Malformed(String),

    #[error("timestamp {0} out of range")]
    OutOfRange(u64),

    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
}

/// Failures while loading event logs for analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}:{line}: invalid record: {source}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
