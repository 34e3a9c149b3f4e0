//! Endpoints: one channel to a daemon, one request in flight at a time
//!
//! An [`Endpoint`] wraps its transport, reusable message buffer and
//! negotiated per-channel state in a single mutex. The lock is taken for the
//! whole pack → send → receive → unpack sequence of a call, so two threads
//! sharing one endpoint serialize strictly while callers on different
//! endpoints proceed in parallel.

use crate::error::{ClientError, Result};
use crate::transport::Transport;
use bytes::Bytes;
use dirsvc_proto::{tag, DirStatus, MessageBuf, Opcode};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Local,
    Remote,
}

/// The lockable half of an endpoint: transport, message buffer, negotiated
/// protocol state
#[derive(Debug)]
pub struct Channel {
    transport: Transport,
    msg: MessageBuf,
    little_endian: bool,
    server_version: u32,
}

impl Channel {
    pub(crate) fn new(transport: Transport, little_endian: bool) -> Self {
        Self {
            transport,
            msg: MessageBuf::new(),
            little_endian,
            server_version: 0,
        }
    }

    /// Reset the message buffer; first step of every request
    pub fn clear(&mut self) {
        self.msg.clear();
    }

    pub fn put_u32(&mut self, tag: u16, value: u32) {
        self.msg.put_u32(tag, value);
    }

    pub fn put_buffer(&mut self, tag: u16, data: &[u8]) {
        self.msg.put_buffer(tag, data);
    }

    pub fn put_capacity_buffer(&mut self, tag: u16, capacity: u32) {
        self.msg.put_capacity_buffer(tag, capacity);
    }

    pub fn put_list<I: AsRef<[u8]>>(&mut self, tag: u16, items: &[I]) {
        self.msg.put_list(tag, items);
    }

    /// Encode and send the packed request
    ///
    /// The low-level cause is logged, not surfaced; the caller converts the
    /// send failure into endpoint teardown.
    pub fn send(&mut self, opcode: Opcode) -> Result<()> {
        trace!(?opcode, fields = self.msg.field_count(), "sending request");
        self.msg
            .write_frame(&mut self.transport, opcode as u32, self.little_endian)
            .map_err(|e| {
                debug!(error = %e, "send failed");
                ClientError::SendFailed
            })
    }

    /// Block until the full reply frame arrives and decode it in place
    pub fn receive(&mut self) -> Result<()> {
        self.msg.read_frame(&mut self.transport).map(drop).map_err(|e| {
            debug!(error = %e, "receive failed");
            ClientError::ReceiveFailed
        })
    }

    /// Extract the result code; always the first field read from a reply
    pub fn status(&self) -> Result<DirStatus> {
        let raw = self
            .msg
            .get_u32(tag::RESULT)
            .map_err(|_| ClientError::MissingReplyField(tag::RESULT))?;
        Ok(DirStatus::from_code(raw as i32))
    }

    /// Fail unless the daemon reported success
    pub fn expect_ok(&self) -> Result<()> {
        let status = self.status()?;
        if status.is_ok() {
            Ok(())
        } else {
            Err(ClientError::Daemon(status))
        }
    }

    /// Like [`expect_ok`], but lets the truncation code through: its reply
    /// still carries a valid partial payload and a continuation token
    ///
    /// [`expect_ok`]: Channel::expect_ok
    pub fn listing_status(&self) -> Result<DirStatus> {
        let status = self.status()?;
        if status.carries_payload() {
            Ok(status)
        } else {
            Err(ClientError::Daemon(status))
        }
    }

    pub fn get_u32(&self, tag: u16) -> Result<u32> {
        self.msg
            .get_u32(tag)
            .map_err(|_| ClientError::MissingReplyField(tag))
    }

    pub fn opt_u32(&self, tag: u16) -> Option<u32> {
        self.msg.opt_u32(tag)
    }

    pub fn get_buffer(&self, tag: u16) -> Result<Bytes> {
        self.msg
            .get_buffer(tag)
            .map_err(|_| ClientError::MissingReplyField(tag))
    }

    pub fn get_list(&self, tag: u16) -> Result<Vec<Bytes>> {
        self.msg
            .get_list(tag)
            .map_err(|_| ClientError::MissingReplyField(tag))
    }

    /// Server protocol revision negotiated at proxy open; 0 means legacy
    pub fn server_version(&self) -> u32 {
        self.server_version
    }

    pub fn set_server_version(&mut self, version: u32) {
        self.server_version = version;
    }

    pub(crate) fn shutdown(&mut self) {
        self.transport.shutdown();
    }
}

/// One communication channel to a daemon, bound to its slot for life
#[derive(Debug)]
pub struct Endpoint {
    slot: usize,
    kind: EndpointKind,
    channel: Mutex<Channel>,
}

impl Endpoint {
    pub(crate) fn new(slot: usize, kind: EndpointKind, channel: Channel) -> Self {
        Self {
            slot,
            kind,
            channel: Mutex::new(channel),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Take the channel for one full request/reply cycle; blocks while
    /// another caller's cycle is in flight
    pub fn channel(&self) -> MutexGuard<'_, Channel> {
        self.channel.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shut the transport down; any blocked or future use fails
    pub(crate) fn close(&self) {
        self.channel().shutdown();
    }
}
