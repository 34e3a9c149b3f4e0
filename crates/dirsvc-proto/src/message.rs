//! Framed, tagged-field request/reply messages
//!
//! Every exchange with the daemon is one request frame followed by one reply
//! frame. A frame is a fixed 16-byte header followed by a set of typed,
//! tagged fields; fields are located by tag, so the order they were packed
//! in does not matter to the receiver.
//!
//! Frame header:
//! ```text
//! +--------+--------+--------+--------+
//! |  vers  | flags  |     reserved    |
//! +--------+--------+--------+--------+
//! |              opcode               |
//! +--------+--------+--------+--------+
//! |           frame length            |
//! +--------+--------+--------+--------+
//! |            field count            |
//! +--------+--------+--------+--------+
//! ```
//!
//! Flags bit 0 declares the sender's integer byte order (set = little
//! endian); every multi-byte integer after the flags byte is read in the
//! declared order. Requests carry the operation code; replies echo it and
//! carry their meaning in the RESULT field.
//!
//! Field encodings:
//! - value:  `u32`
//! - buffer: `{ capacity: u32, length: u32, bytes[length] }` — capacity lets
//!   a caller declare output room without shipping the bytes
//! - list:   `{ count: u32, (length: u32, bytes[length]) * count }`

use crate::error::{ProtoError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

/// Wire protocol revision
pub const PROTO_VERSION: u8 = 1;

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Default bound on a single frame, header included
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const FLAG_LITTLE_ENDIAN: u8 = 0x01;

const FIELD_VALUE: u16 = 1;
const FIELD_BUFFER: u16 = 2;
const FIELD_LIST: u16 = 3;

/// Field tags
///
/// Tags are shared between requests and replies; a given opcode defines
/// which tags it requires in each direction.
pub mod tag {
    pub const RESULT: u16 = 1;
    pub const DIR_REF: u16 = 2;
    pub const NODE_REF: u16 = 3;
    pub const RECORD_REF: u16 = 4;
    pub const ATTR_LIST_REF: u16 = 5;
    pub const ATTR_VALUE_LIST_REF: u16 = 6;
    pub const DATA_BUF: u16 = 7;
    pub const OUT_BUF_LEN: u16 = 8;
    pub const CONTEXT: u16 = 9;
    pub const NODE_COUNT: u16 = 10;
    pub const CHANGE_TOKEN: u16 = 11;
    pub const NODE_NAME_PATTERN: u16 = 12;
    pub const PATTERN_MATCH: u16 = 13;
    pub const AUTH_METHOD: u16 = 14;
    pub const AUTH_STEP: u16 = 15;
    pub const AUTH_RESPONSE: u16 = 16;
    pub const FILE_PATH: u16 = 17;
    pub const PLUGIN_NAME: u16 = 18;
    pub const SERVER_VERSION: u16 = 19;
    pub const VERSION_INFO: u16 = 20;
    pub const REC_NAME_LIST: u16 = 21;
    pub const REC_TYPE_LIST: u16 = 22;
    pub const ATTR_TYPE_LIST: u16 = 23;
    pub const ATTRS_ONLY: u16 = 24;
    pub const REC_ENTRY_COUNT: u16 = 25;
    pub const CONNECTION_COUNT: u16 = 26;
    pub const REC_TYPE: u16 = 27;
    pub const REC_NAME: u16 = 28;
}

/// Request operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    OpenSession = 1,
    OpenSessionProxy = 2,
    OpenSessionLocal = 3,
    CloseSession = 4,
    VerifySessionRef = 5,
    GetNodeCount = 6,
    GetNodeCountWithInfo = 7,
    GetNodeList = 8,
    FindNodes = 9,
    ReleaseContinuation = 10,
    OpenNode = 11,
    CloseNode = 12,
    OpenRecord = 13,
    CloseRecord = 14,
    ListRecords = 15,
}

impl Opcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::OpenSession),
            2 => Some(Self::OpenSessionProxy),
            3 => Some(Self::OpenSessionLocal),
            4 => Some(Self::CloseSession),
            5 => Some(Self::VerifySessionRef),
            6 => Some(Self::GetNodeCount),
            7 => Some(Self::GetNodeCountWithInfo),
            8 => Some(Self::GetNodeList),
            9 => Some(Self::FindNodes),
            10 => Some(Self::ReleaseContinuation),
            11 => Some(Self::OpenNode),
            12 => Some(Self::CloseNode),
            13 => Some(Self::OpenRecord),
            14 => Some(Self::CloseRecord),
            15 => Some(Self::ListRecords),
            _ => None,
        }
    }
}

/// One decoded or to-be-encoded field
#[derive(Debug, Clone)]
pub enum Field {
    U32(u32),
    Buffer { capacity: u32, data: Bytes },
    List(Vec<Bytes>),
}

impl Field {
    fn payload_len(&self) -> usize {
        match self {
            Field::U32(_) => 4,
            Field::Buffer { data, .. } => 8 + data.len(),
            Field::List(items) => 4 + items.iter().map(|i| 4 + i.len()).sum::<usize>(),
        }
    }
}

/// Reusable message buffer: packed for a request, then overwritten by the
/// decoded reply
///
/// One `MessageBuf` lives inside each endpoint channel and is cleared before
/// every request.
#[derive(Debug)]
pub struct MessageBuf {
    fields: Vec<(u16, Field)>,
    scratch: BytesMut,
    max_frame_size: usize,
}

impl Default for MessageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuf {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            scratch: BytesMut::with_capacity(512),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Drop all fields; called before packing each request
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has(&self, tag: u16) -> bool {
        self.fields.iter().any(|(t, _)| *t == tag)
    }

    pub fn put_u32(&mut self, tag: u16, value: u32) {
        self.fields.push((tag, Field::U32(value)));
    }

    pub fn put_buffer(&mut self, tag: u16, data: &[u8]) {
        self.fields.push((
            tag,
            Field::Buffer {
                capacity: data.len() as u32,
                data: Bytes::copy_from_slice(data),
            },
        ));
    }

    /// Pack a buffer that declares output capacity but carries no bytes;
    /// the legacy encoding for caller-supplied output room
    pub fn put_capacity_buffer(&mut self, tag: u16, capacity: u32) {
        self.fields.push((
            tag,
            Field::Buffer {
                capacity,
                data: Bytes::new(),
            },
        ));
    }

    pub fn put_list<I: AsRef<[u8]>>(&mut self, tag: u16, items: &[I]) {
        let items = items
            .iter()
            .map(|i| Bytes::copy_from_slice(i.as_ref()))
            .collect();
        self.fields.push((tag, Field::List(items)));
    }

    fn find(&self, tag: u16) -> Option<&Field> {
        self.fields.iter().find(|(t, _)| *t == tag).map(|(_, f)| f)
    }

    pub fn get_u32(&self, tag: u16) -> Result<u32> {
        match self.find(tag) {
            Some(Field::U32(v)) => Ok(*v),
            Some(_) => Err(ProtoError::WrongFieldType { tag }),
            None => Err(ProtoError::MissingField(tag)),
        }
    }

    pub fn opt_u32(&self, tag: u16) -> Option<u32> {
        match self.find(tag) {
            Some(Field::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_buffer(&self, tag: u16) -> Result<Bytes> {
        match self.find(tag) {
            Some(Field::Buffer { data, .. }) => Ok(data.clone()),
            Some(_) => Err(ProtoError::WrongFieldType { tag }),
            None => Err(ProtoError::MissingField(tag)),
        }
    }

    pub fn get_buffer_capacity(&self, tag: u16) -> Result<u32> {
        match self.find(tag) {
            Some(Field::Buffer { capacity, .. }) => Ok(*capacity),
            Some(_) => Err(ProtoError::WrongFieldType { tag }),
            None => Err(ProtoError::MissingField(tag)),
        }
    }

    pub fn get_list(&self, tag: u16) -> Result<Vec<Bytes>> {
        match self.find(tag) {
            Some(Field::List(items)) => Ok(items.clone()),
            Some(_) => Err(ProtoError::WrongFieldType { tag }),
            None => Err(ProtoError::MissingField(tag)),
        }
    }

    /// Encode the packed fields and write one complete frame
    pub fn write_frame<W: Write>(
        &mut self,
        writer: &mut W,
        opcode: u32,
        little_endian: bool,
    ) -> Result<()> {
        let body_len: usize = self.fields.iter().map(|(_, f)| 8 + f.payload_len()).sum();
        let frame_len = HEADER_SIZE + body_len;
        if frame_len > self.max_frame_size {
            return Err(ProtoError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        self.scratch.clear();
        self.scratch.reserve(frame_len);
        self.scratch.put_u8(PROTO_VERSION);
        self.scratch
            .put_u8(if little_endian { FLAG_LITTLE_ENDIAN } else { 0 });
        put_u16(&mut self.scratch, 0, little_endian);
        put_u32(&mut self.scratch, opcode, little_endian);
        put_u32(&mut self.scratch, frame_len as u32, little_endian);
        put_u32(&mut self.scratch, self.fields.len() as u32, little_endian);

        for (tag, field) in &self.fields {
            put_u16(&mut self.scratch, *tag, little_endian);
            let ftype = match field {
                Field::U32(_) => FIELD_VALUE,
                Field::Buffer { .. } => FIELD_BUFFER,
                Field::List(_) => FIELD_LIST,
            };
            put_u16(&mut self.scratch, ftype, little_endian);
            put_u32(&mut self.scratch, field.payload_len() as u32, little_endian);
            match field {
                Field::U32(v) => put_u32(&mut self.scratch, *v, little_endian),
                Field::Buffer { capacity, data } => {
                    put_u32(&mut self.scratch, *capacity, little_endian);
                    put_u32(&mut self.scratch, data.len() as u32, little_endian);
                    self.scratch.put_slice(data);
                }
                Field::List(items) => {
                    put_u32(&mut self.scratch, items.len() as u32, little_endian);
                    for item in items {
                        put_u32(&mut self.scratch, item.len() as u32, little_endian);
                        self.scratch.put_slice(item);
                    }
                }
            }
        }

        writer.write_all(&self.scratch)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one complete frame, replacing the current field set; returns the
    /// raw opcode from the header
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<u32> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        if header[0] != PROTO_VERSION {
            return Err(ProtoError::VersionMismatch {
                expected: PROTO_VERSION,
                got: header[0],
            });
        }
        let little_endian = header[1] & FLAG_LITTLE_ENDIAN != 0;

        let mut rest = &header[4..];
        let opcode = read_u32(&mut rest, little_endian);
        let frame_len = read_u32(&mut rest, little_endian) as usize;
        let field_count = read_u32(&mut rest, little_endian) as usize;

        if frame_len < HEADER_SIZE {
            return Err(ProtoError::Truncated {
                needed: HEADER_SIZE,
                have: frame_len,
            });
        }
        if frame_len > self.max_frame_size {
            return Err(ProtoError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        let body_len = frame_len - HEADER_SIZE;
        self.scratch.clear();
        self.scratch.resize(body_len, 0);
        reader.read_exact(&mut self.scratch)?;
        let mut body = self.scratch.split().freeze();

        self.fields.clear();
        for _ in 0..field_count {
            need(&body, 8)?;
            let tag = get_u16(&mut body, little_endian);
            let ftype = get_u16(&mut body, little_endian);
            let len = get_u32(&mut body, little_endian) as usize;
            need(&body, len)?;
            let mut payload = body.split_to(len);
            let field = match ftype {
                FIELD_VALUE => {
                    need(&payload, 4)?;
                    Field::U32(get_u32(&mut payload, little_endian))
                }
                FIELD_BUFFER => {
                    need(&payload, 8)?;
                    let capacity = get_u32(&mut payload, little_endian);
                    let data_len = get_u32(&mut payload, little_endian) as usize;
                    need(&payload, data_len)?;
                    Field::Buffer {
                        capacity,
                        data: payload.split_to(data_len),
                    }
                }
                FIELD_LIST => {
                    need(&payload, 4)?;
                    let count = get_u32(&mut payload, little_endian) as usize;
                    let mut items = Vec::with_capacity(count.min(1024));
                    for _ in 0..count {
                        need(&payload, 4)?;
                        let item_len = get_u32(&mut payload, little_endian) as usize;
                        need(&payload, item_len)?;
                        items.push(payload.split_to(item_len));
                    }
                    Field::List(items)
                }
                other => return Err(ProtoError::UnknownFieldType(other)),
            };
            self.fields.push((tag, field));
        }

        Ok(opcode)
    }
}

fn put_u16(buf: &mut BytesMut, value: u16, little_endian: bool) {
    if little_endian {
        buf.put_u16_le(value);
    } else {
        buf.put_u16(value);
    }
}

fn put_u32(buf: &mut BytesMut, value: u32, little_endian: bool) {
    if little_endian {
        buf.put_u32_le(value);
    } else {
        buf.put_u32(value);
    }
}

fn get_u16(buf: &mut Bytes, little_endian: bool) -> u16 {
    if little_endian {
        buf.get_u16_le()
    } else {
        buf.get_u16()
    }
}

fn get_u32(buf: &mut Bytes, little_endian: bool) -> u32 {
    if little_endian {
        buf.get_u32_le()
    } else {
        buf.get_u32()
    }
}

fn read_u32(buf: &mut &[u8], little_endian: bool) -> u32 {
    if little_endian {
        buf.get_u32_le()
    } else {
        buf.get_u32()
    }
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.len() < n {
        return Err(ProtoError::Truncated {
            needed: n,
            have: buf.len(),
        });
    }
    Ok(())
}
