//! Client error taxonomy
//!
//! Every public call returns `Result<T, ClientError>`. Argument and
//! resolution errors are raised before any transport activity; transport
//! failures are collapsed to [`ClientError::CannotAccessSession`] after the
//! offending endpoint is torn down, so callers never see the low-level cause.

use dirsvc_proto::DirStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    // Argument errors: detected before touching the endpoint table.
    #[error("required parameter is missing")]
    NullParameter,

    #[error("required buffer is empty")]
    EmptyBuffer,

    #[error("invalid reference")]
    InvalidReference,

    #[error("invalid data-source path")]
    InvalidPath,

    // Resolution errors: no transport attempt is made.
    #[error("reference not found")]
    RefNotFound,

    #[error("endpoint slot {slot} out of range (max {max})")]
    SlotOutOfRange { slot: usize, max: usize },

    // Session-policy errors, raised before any endpoint is touched.
    #[error("too many sessions open")]
    MaxSessionsOpen,

    #[error("local-only daemon in use")]
    LocalOnlyDaemonInUse,

    #[error("standard daemon in use")]
    StandardDaemonInUse,

    #[error("directory service not running")]
    ServiceNotRunning,

    // Transport collapse: the endpoint was closed and its slot freed.
    #[error("cannot access session")]
    CannotAccessSession,

    // Daemon-reported result code, passed through unchanged.
    #[error("daemon error: {0}")]
    Daemon(DirStatus),

    #[error("reply missing field tag {0}")]
    MissingReplyField(u16),

    // Internal transport phases; public calls convert these to
    // CannotAccessSession while tearing the endpoint down.
    #[error("send failed")]
    SendFailed,

    #[error("receive failed")]
    ReceiveFailed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
