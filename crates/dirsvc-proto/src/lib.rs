//! Wire protocol for the dirsvc daemon
//!
//! This crate implements the framed, tagged-field request/reply format both
//! sides of a dirsvc session speak, over either the local channel or TCP:
//!
//! - length-prefixed frames with a fixed header carrying the operation code
//!   and the sender's declared byte order
//! - typed fields (values, capacity-declared buffers, opaque lists) located
//!   by small integer tags rather than position
//! - the daemon's result-code vocabulary, including the partial-success
//!   truncation code listing calls rely on
//!
//! The transport beneath the frames (connecting, blocking, teardown) lives
//! in `dirsvc-client`; this crate only needs `Read`/`Write`.
//!
//! # Example
//!
//! ```
//! use dirsvc_proto::{MessageBuf, Opcode, tag};
//!
//! let mut msg = MessageBuf::new();
//! msg.put_u32(tag::DIR_REF, 0x0A00_0001);
//! msg.put_capacity_buffer(tag::OUT_BUF_LEN, 4096);
//!
//! let mut wire = Vec::new();
//! msg.write_frame(&mut wire, Opcode::GetNodeList as u32, true).unwrap();
//!
//! let mut reply = MessageBuf::new();
//! let opcode = reply.read_frame(&mut wire.as_slice()).unwrap();
//! assert_eq!(Opcode::from_u32(opcode), Some(Opcode::GetNodeList));
//! ```

pub mod error;
pub mod message;
pub mod status;

pub use error::{ProtoError, Result};
pub use message::{
    tag, Field, MessageBuf, Opcode, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, PROTO_VERSION,
};
pub use status::DirStatus;
