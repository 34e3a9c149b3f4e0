//! Error types for the dirsvc wire protocol

use thiserror::Error;

/// Protocol-level errors: framing, decoding, and the I/O beneath them
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("unknown field encoding: {0}")]
    UnknownFieldType(u16),

    #[error("missing field: tag {0}")]
    MissingField(u16),

    #[error("field tag {tag} has wrong encoding for requested type")]
    WrongFieldType { tag: u16 },
}

pub type Result<T> = std::result::Result<T, ProtoError>;
