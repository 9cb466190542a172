use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of a device call.
#[derive(Debug, Error)]
pub enum Error {
    /// Dial or stream I/O failed. The connection has been dropped.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    /// The round-tripper is bound to another scheme.
    #[error("bad url scheme: {bound} != {requested}")]
    SchemeMismatch { bound: String, requested: String },

    /// The device answered with something the protocol does not allow.
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// No more data right now.
    #[error("EOF")]
    Eof,

    /// Device-reported failure, passed through verbatim.
    #[error("{0}")]
    Remote(String),

    /// The device is reconfiguring; retry later.
    #[error("updating")]
    Busy,

    /// The device closed the logical connection.
    #[error("use of closed connection")]
    Closed,

    #[error("shared memory '{handle}': {reason}")]
    SharedMemory { handle: String, reason: String },
}

impl Error {
    pub(crate) fn invalid_url(url: &str, reason: &'static str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason,
        }
    }

    pub(crate) fn shared_memory(handle: &str, reason: impl ToString) -> Self {
        Self::SharedMemory {
            handle: handle.to_string(),
            reason: reason.to_string(),
        }
    }
}
