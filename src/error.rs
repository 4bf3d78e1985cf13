//! Error taxonomy for the transport, the dispatcher protocol and file loading.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EventId, ZoneId};

/// Socket-level and codec failures; distinguishable from dispatcher rejections.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("no reply to {method} after {attempts} attempt(s)")]
    Exhausted { method: &'static str, attempts: u32 },

    #[error("{method} request is {len} bytes, over the {max} byte datagram limit")]
    Oversize { method: &'static str, len: usize, max: usize },
}

/// Application-level rejection returned by the dispatcher inside a reply.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum RemoteError {
    #[error("unknown method `{0}`")]
    UnknownMethod(String),

    #[error("malformed arguments for {method}: {reason}")]
    MalformedArguments { method: String, reason: String },

    #[error("unknown zone {0}")]
    UnknownZone(ZoneId),

    #[error("event #{0} is not checked out")]
    NotCheckedOut(EventId),

    #[error("{method} is not permitted for {caller}")]
    NotPermitted { method: String, caller: String },
}

/// Failure of a single dispatcher call as seen by the caller.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("dispatcher rejected call: {0}")]
    Remote(#[from] RemoteError),

    #[error("unexpected reply to {method}: {reply}")]
    UnexpectedReply { method: &'static str, reply: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Top-level failure of a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} thread panicked")]
    ThreadPanic(String),

    #[error("run aborted after {name} failed: {source}")]
    WorkerFailed {
        name: String,
        #[source]
        source: RpcError,
    },
}
