//! Shared test fixtures: an in-process mock daemon speaking the dirsvc wire
//! protocol over TCP or a Unix socket
//!
//! The daemon is deliberately small: it allocates server refs, serves node
//! and record listings with real capacity-based truncation and server-side
//! cursors, and can be armed to drop a connection mid-call to simulate a
//! transport failure.

#![allow(dead_code)]

use dirsvc_proto::{tag, DirStatus, MessageBuf, Opcode};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();
    });
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub nodes: Vec<String>,
    pub records: Vec<String>,
    /// 0 makes the daemon a legacy server: the proxy-open reply omits the
    /// server version field entirely
    pub server_version: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            nodes: vec![
                "net/alpha".into(),
                "net/beta".into(),
                "net/gamma".into(),
                "local/users".into(),
                "local/groups".into(),
            ],
            records: vec![
                "users/alice".into(),
                "users/bob".into(),
                "groups/wheel".into(),
            ],
            server_version: 2,
        }
    }
}

pub struct MockDaemon {
    config: MockConfig,
    next_ref: AtomicU32,
    open_refs: Mutex<HashSet<u32>>,
    cursors: Mutex<HashMap<u32, Vec<String>>>,
    next_cursor: AtomicU32,
    drop_next_request: AtomicBool,
    saw_size_only: AtomicBool,
    saw_legacy_capacity: AtomicBool,
}

impl MockDaemon {
    pub fn new(config: MockConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_ref: AtomicU32::new(0x0A00_0001),
            open_refs: Mutex::new(HashSet::new()),
            cursors: Mutex::new(HashMap::new()),
            next_cursor: AtomicU32::new(1),
            drop_next_request: AtomicBool::new(false),
            saw_size_only: AtomicBool::new(false),
            saw_legacy_capacity: AtomicBool::new(false),
        })
    }

    /// Drop the connection instead of replying to the next request
    pub fn arm_drop_next(&self) {
        self.drop_next_request.store(true, Ordering::SeqCst);
    }

    pub fn saw_size_only(&self) -> bool {
        self.saw_size_only.load(Ordering::SeqCst)
    }

    pub fn saw_legacy_capacity(&self) -> bool {
        self.saw_legacy_capacity.load(Ordering::SeqCst)
    }

    pub fn open_ref_count(&self) -> usize {
        self.open_refs.lock().unwrap().len()
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.lock().unwrap().len()
    }

    fn alloc_ref(&self) -> u32 {
        let r = self.next_ref.fetch_add(1, Ordering::SeqCst);
        self.open_refs.lock().unwrap().insert(r);
        r
    }

    fn handle(&self, opcode: Option<Opcode>, msg: &mut MessageBuf) {
        match opcode {
            Some(Opcode::OpenSession) | Some(Opcode::OpenSessionLocal) => {
                let server_ref = self.alloc_ref();
                msg.clear();
                msg.put_u32(tag::RESULT, DirStatus::Ok.code() as u32);
                msg.put_u32(tag::DIR_REF, server_ref);
            }
            Some(Opcode::OpenSessionProxy) => {
                let has_version = msg.get_buffer(tag::VERSION_INFO).is_ok();
                msg.clear();
                if !has_version {
                    msg.put_u32(tag::RESULT, DirStatus::InvalidReference.code() as u32);
                    return;
                }
                let server_ref = self.alloc_ref();
                msg.put_u32(tag::RESULT, DirStatus::Ok.code() as u32);
                if self.config.server_version > 0 {
                    msg.put_u32(tag::SERVER_VERSION, self.config.server_version);
                }
                msg.put_u32(tag::DIR_REF, server_ref);
            }
            Some(Opcode::CloseSession)
            | Some(Opcode::CloseNode)
            | Some(Opcode::CloseRecord) => {
                let ref_tag = match opcode {
                    Some(Opcode::CloseSession) => tag::DIR_REF,
                    Some(Opcode::CloseNode) => tag::NODE_REF,
                    _ => tag::RECORD_REF,
                };
                if let Ok(server_ref) = msg.get_u32(ref_tag) {
                    self.open_refs.lock().unwrap().remove(&server_ref);
                }
                msg.clear();
                msg.put_u32(tag::RESULT, DirStatus::Ok.code() as u32);
            }
            Some(Opcode::VerifySessionRef) => {
                let known = msg
                    .get_u32(tag::DIR_REF)
                    .map(|r| self.open_refs.lock().unwrap().contains(&r))
                    .unwrap_or(false);
                msg.clear();
                let status = if known {
                    DirStatus::Ok
                } else {
                    DirStatus::InvalidReference
                };
                msg.put_u32(tag::RESULT, status.code() as u32);
            }
            Some(Opcode::GetNodeCount) => {
                msg.clear();
                msg.put_u32(tag::RESULT, DirStatus::Ok.code() as u32);
                msg.put_u32(tag::NODE_COUNT, self.config.nodes.len() as u32);
            }
            Some(Opcode::GetNodeCountWithInfo) => {
                msg.clear();
                msg.put_u32(tag::RESULT, DirStatus::Ok.code() as u32);
                msg.put_u32(tag::NODE_COUNT, self.config.nodes.len() as u32);
                msg.put_u32(tag::CHANGE_TOKEN, 42);
            }
            Some(Opcode::GetNodeList) => {
                let capacity = msg.get_u32(tag::OUT_BUF_LEN).unwrap_or(0);
                let cursor_in = msg.get_u32(tag::CONTEXT).unwrap_or(0);
                let Some(pending) = self.take_pending(cursor_in, || self.config.nodes.clone())
                else {
                    return reply_status(msg, DirStatus::InvalidContinuation);
                };
                self.reply_listing(msg, pending, capacity, tag::NODE_COUNT);
            }
            Some(Opcode::FindNodes) => {
                let capacity = msg.get_u32(tag::OUT_BUF_LEN).unwrap_or(0);
                let cursor_in = msg.get_u32(tag::CONTEXT).unwrap_or(0);
                let match_type = msg.get_u32(tag::PATTERN_MATCH).unwrap_or(0);
                let patterns: Vec<String> = msg
                    .get_list(tag::NODE_NAME_PATTERN)
                    .map(|items| {
                        items
                            .iter()
                            .map(|b| String::from_utf8_lossy(b).into_owned())
                            .collect()
                    })
                    .unwrap_or_default();
                let Some(pending) = self.take_pending(cursor_in, || {
                    self.config
                        .nodes
                        .iter()
                        .filter(|n| node_matches(n, match_type, &patterns))
                        .cloned()
                        .collect()
                }) else {
                    return reply_status(msg, DirStatus::InvalidContinuation);
                };
                self.reply_listing(msg, pending, capacity, tag::NODE_COUNT);
            }
            Some(Opcode::ReleaseContinuation) => {
                let cursor = msg.get_u32(tag::CONTEXT).unwrap_or(0);
                let existed = self.cursors.lock().unwrap().remove(&cursor).is_some();
                msg.clear();
                let status = if existed {
                    DirStatus::Ok
                } else {
                    DirStatus::InvalidContinuation
                };
                msg.put_u32(tag::RESULT, status.code() as u32);
            }
            Some(Opcode::OpenNode) => {
                let path_ok = msg
                    .get_list(tag::NODE_NAME_PATTERN)
                    .map(|items| !items.is_empty())
                    .unwrap_or(false);
                msg.clear();
                if !path_ok {
                    msg.put_u32(tag::RESULT, DirStatus::UnknownNodeName.code() as u32);
                    return;
                }
                let server_ref = self.alloc_ref();
                msg.put_u32(tag::RESULT, DirStatus::Ok.code() as u32);
                msg.put_u32(tag::NODE_REF, server_ref);
                msg.put_buffer(tag::PLUGIN_NAME, b"LocalFiles");
            }
            Some(Opcode::OpenRecord) => {
                let name = msg
                    .get_buffer(tag::REC_NAME)
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
                msg.clear();
                if name == "missing" {
                    msg.put_u32(tag::RESULT, DirStatus::RecordNotFound.code() as u32);
                    return;
                }
                let server_ref = self.alloc_ref();
                msg.put_u32(tag::RESULT, DirStatus::Ok.code() as u32);
                msg.put_u32(tag::RECORD_REF, server_ref);
            }
            Some(Opcode::ListRecords) => {
                let capacity = if let Ok(size) = msg.get_u32(tag::OUT_BUF_LEN) {
                    self.saw_size_only.store(true, Ordering::SeqCst);
                    size
                } else {
                    self.saw_legacy_capacity.store(true, Ordering::SeqCst);
                    msg.get_buffer_capacity(tag::DATA_BUF).unwrap_or(0)
                };
                let cursor_in = msg.get_u32(tag::CONTEXT).unwrap_or(0);
                let Some(pending) = self.take_pending(cursor_in, || self.config.records.clone())
                else {
                    return reply_status(msg, DirStatus::InvalidContinuation);
                };
                self.reply_listing(msg, pending, capacity, tag::REC_ENTRY_COUNT);
            }
            None => {
                msg.clear();
                msg.put_u32(tag::RESULT, DirStatus::Other(-1).code() as u32);
            }
        }
    }

    /// `None` means the caller presented a cursor this daemon no longer has
    fn take_pending(
        &self,
        cursor_in: u32,
        fresh: impl FnOnce() -> Vec<String>,
    ) -> Option<Vec<String>> {
        if cursor_in != 0 {
            self.cursors.lock().unwrap().remove(&cursor_in)
        } else {
            Some(fresh())
        }
    }

    fn reply_listing(
        &self,
        msg: &mut MessageBuf,
        pending: Vec<String>,
        capacity: u32,
        count_tag: u16,
    ) {
        let (buf, taken, remainder) = pack_names(&pending, capacity as usize);
        let cursor_out = if remainder.is_empty() {
            0
        } else {
            let cursor = self.next_cursor.fetch_add(1, Ordering::SeqCst);
            self.cursors.lock().unwrap().insert(cursor, remainder);
            cursor
        };
        let status = if cursor_out != 0 {
            DirStatus::BufferTooSmall
        } else {
            DirStatus::Ok
        };
        msg.clear();
        msg.put_u32(tag::RESULT, status.code() as u32);
        msg.put_buffer(tag::DATA_BUF, &buf);
        msg.put_u32(count_tag, taken);
        msg.put_u32(tag::CONTEXT, cursor_out);
    }
}

fn reply_status(msg: &mut MessageBuf, status: DirStatus) {
    msg.clear();
    msg.put_u32(tag::RESULT, status.code() as u32);
}

fn node_matches(node: &str, match_type: u32, patterns: &[String]) -> bool {
    match match_type {
        1 => patterns.iter().any(|p| node == p),
        2 => patterns.iter().any(|p| node.starts_with(p.as_str())),
        3 => patterns.iter().any(|p| node.ends_with(p.as_str())),
        4 => patterns.iter().any(|p| node.contains(p.as_str())),
        100 => node.starts_with("local/"),
        _ => false,
    }
}

/// The daemon's result-buffer layout: count, then length-prefixed names.
/// Opaque to the client runtime; tests unpack it with [`parse_names`].
fn pack_names(names: &[String], capacity: usize) -> (Vec<u8>, u32, Vec<String>) {
    let mut buf = vec![0u8; 4];
    let mut taken = 0u32;
    let mut remainder = Vec::new();
    for (i, name) in names.iter().enumerate() {
        if buf.len() + 4 + name.len() > capacity {
            remainder = names[i..].to_vec();
            break;
        }
        buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        taken += 1;
    }
    buf[0..4].copy_from_slice(&taken.to_le_bytes());
    (buf, taken, remainder)
}

pub fn parse_names(data: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    if data.len() < 4 {
        return names;
    }
    let count = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
    let mut at = 4;
    for _ in 0..count {
        let len = u32::from_le_bytes(data[at..at + 4].try_into().unwrap()) as usize;
        at += 4;
        names.push(String::from_utf8_lossy(&data[at..at + len]).into_owned());
        at += len;
    }
    names
}

fn serve<S: Read + Write>(daemon: Arc<MockDaemon>, mut stream: S) {
    let mut msg = MessageBuf::new();
    loop {
        let opcode = match msg.read_frame(&mut stream) {
            Ok(op) => op,
            Err(_) => return,
        };
        if daemon.drop_next_request.swap(false, Ordering::SeqCst) {
            return;
        }
        daemon.handle(Opcode::from_u32(opcode), &mut msg);
        if msg.write_frame(&mut stream, opcode, true).is_err() {
            return;
        }
    }
}

/// Serve the daemon on an ephemeral TCP port; the listener thread lives for
/// the rest of the test process
pub fn spawn_tcp_daemon(daemon: Arc<MockDaemon>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            stream.set_nodelay(true).ok();
            let daemon = daemon.clone();
            thread::spawn(move || serve(daemon, stream));
        }
    });
    addr
}

/// Serve the daemon on a Unix socket path
pub fn spawn_unix_daemon(daemon: Arc<MockDaemon>, path: &Path) {
    let listener = UnixListener::bind(path).unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let daemon = daemon.clone();
            thread::spawn(move || serve(daemon, stream));
        }
    });
}
