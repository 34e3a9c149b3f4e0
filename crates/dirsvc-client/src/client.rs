//! Client call surface
//!
//! Every call follows the same sequence: validate arguments, resolve the
//! handle to (endpoint, server handle), take the endpoint channel, pack the
//! tagged fields, send the opcode, block for the reply, extract the result
//! code, extract the remaining fields, then register or remove correlation
//! entries. A transport failure anywhere in the cycle tears the endpoint
//! down and surfaces as `CannotAccessSession`.

use crate::endpoint_table::LOCAL_SLOT;
use crate::error::{ClientError, Result};
use crate::refs::{ContinuationToken, DirRef, NodeRef, PatternMatch, RecordRef, RefKind};
use crate::session::{LocalFlavor, Session, SessionConfig};
use crate::transport::service_available;
use bytes::Bytes;
use dirsvc_proto::{tag, DirStatus, Opcode};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Version info sent in every proxy-open request
pub const PROXY_VERSION_INFO: &[u8] = b"DirProxy1.3";

/// Default data-source path for the local-only daemon flavor
pub const DEFAULT_LOCAL_DB: &str = "/var/db/dirsvcd/nodes/Default";

/// Result of a listing call
///
/// `data` is the daemon's packed result buffer, opaque at this layer;
/// dedicated accessors unpack it client-side. `truncated` means the daemon
/// reported the caller's capacity as too small: the payload is still valid
/// but partial, and `continuation` (when present) resumes where it stopped.
#[derive(Debug, Clone)]
pub struct ListResult {
    pub data: Bytes,
    pub count: u32,
    pub continuation: Option<ContinuationToken>,
    pub truncated: bool,
}

/// The process-facing directory-service client
///
/// All methods are synchronous and may block for the duration of one
/// request/reply round trip. Concurrent calls on different endpoints
/// proceed in parallel; calls sharing an endpoint serialize on it.
#[derive(Debug)]
pub struct DirClient {
    session: Session,
}

impl DirClient {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            session: Session::new(config),
        }
    }

    /// The process-wide instance with default configuration
    pub fn shared() -> &'static DirClient {
        static INSTANCE: OnceLock<DirClient> = OnceLock::new();
        INSTANCE.get_or_init(|| DirClient::new(SessionConfig::default()))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Convert a transport-phase failure into endpoint teardown plus the
    /// generic session error; everything else passes through
    fn finish<T>(&self, slot: usize, result: Result<T>) -> Result<T> {
        match result {
            Err(ClientError::SendFailed) | Err(ClientError::ReceiveFailed) => {
                self.session.fail_endpoint(slot);
                Err(ClientError::CannotAccessSession)
            }
            other => other,
        }
    }

    /// Probe whether the standard daemon is reachable; opens no session
    pub fn is_service_running(&self) -> bool {
        service_available(&self.session.config().service_socket)
    }

    /// Probe whether the local-only daemon flavor is reachable
    pub fn is_local_service_running(&self) -> bool {
        service_available(&self.session.config().local_service_socket)
    }

    /// Open a session with the standard daemon over the shared local channel
    pub fn open_session(&self) -> Result<DirRef> {
        let (endpoint, lease) = self.session.open_local(LocalFlavor::Standard)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.send(Opcode::OpenSession)?;
            chan.receive()?;
            chan.expect_ok()?;
            chan.get_u32(tag::DIR_REF)
        })();
        let server_ref = self.finish(LOCAL_SLOT, result)?;

        let client_ref = self.session.refs().register(
            RefKind::Directory,
            server_ref,
            Session::pid(),
            LOCAL_SLOT,
            None,
            None,
        );
        lease.commit();
        Ok(DirRef::from_raw(client_ref))
    }

    /// Open a session with the local-only daemon flavor against a validated
    /// data-source path
    pub fn open_local_session(&self, db_path: Option<&Path>) -> Result<DirRef> {
        let path: PathBuf = match db_path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(DEFAULT_LOCAL_DB),
        };
        if !path.is_absolute() || !path.exists() {
            return Err(ClientError::InvalidPath);
        }

        let (endpoint, lease) = self.session.open_local(LocalFlavor::LocalOnly)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_buffer(tag::FILE_PATH, path.as_os_str().as_bytes());
            chan.send(Opcode::OpenSessionLocal)?;
            chan.receive()?;
            chan.expect_ok()?;
            chan.get_u32(tag::DIR_REF)
        })();
        let server_ref = self.finish(LOCAL_SLOT, result)?;

        let client_ref = self.session.refs().register(
            RefKind::Directory,
            server_ref,
            Session::pid(),
            LOCAL_SLOT,
            None,
            None,
        );
        lease.commit();
        Ok(DirRef::from_raw(client_ref))
    }

    /// Open a proxy session with a remote daemon, performing the version
    /// handshake; the default port applies when none is given
    pub fn open_remote_session(
        &self,
        host: &str,
        port: Option<u16>,
        auth_method: &str,
        auth_data: &[u8],
    ) -> Result<DirRef> {
        if host.is_empty() || auth_method.is_empty() {
            return Err(ClientError::NullParameter);
        }
        if auth_data.is_empty() {
            return Err(ClientError::EmptyBuffer);
        }

        let (slot, endpoint, lease) = self.session.open_remote(host, port)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_buffer(tag::VERSION_INFO, PROXY_VERSION_INFO);
            chan.put_buffer(tag::AUTH_METHOD, auth_method.as_bytes());
            chan.put_buffer(tag::AUTH_STEP, auth_data);
            chan.send(Opcode::OpenSessionProxy)?;
            chan.receive()?;
            chan.expect_ok()?;
            // The reply carries the server revision only from servers new
            // enough to have one; absence means legacy.
            let server_version = chan.opt_u32(tag::SERVER_VERSION).unwrap_or(0);
            chan.set_server_version(server_version);
            debug!(slot, server_version, "proxy session negotiated");
            chan.get_u32(tag::DIR_REF)
        })();
        let server_ref = self.finish(slot, result)?;

        let client_ref = self.session.refs().register(
            RefKind::Directory,
            server_ref,
            Session::pid(),
            slot,
            None,
            None,
        );
        lease.commit();
        Ok(DirRef::from_raw(client_ref))
    }

    /// Close a session and give its endpoint claim back
    pub fn close_session(&self, dir: DirRef) -> Result<()> {
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let connections = self.session.connection_count();
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.put_u32(tag::CONNECTION_COUNT, connections);
            chan.send(Opcode::CloseSession)?;
            chan.receive()?;
            chan.expect_ok()
        })();
        self.finish(slot, result)?;

        self.session.refs().remove(dir.raw(), Session::pid());
        if slot == LOCAL_SLOT {
            self.session.release_local();
        } else {
            self.session.discard_remote(slot);
        }
        Ok(())
    }

    /// Ask the daemon whether a session reference is still valid
    pub fn verify_session_ref(&self, dir: DirRef) -> Result<()> {
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.send(Opcode::VerifySessionRef)?;
            chan.receive()?;
            chan.expect_ok()
        })();
        self.finish(slot, result)
    }

    /// Total number of nodes known to the directory
    pub fn node_count(&self, dir: DirRef) -> Result<u32> {
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.send(Opcode::GetNodeCount)?;
            chan.receive()?;
            chan.expect_ok()?;
            chan.get_u32(tag::NODE_COUNT)
        })();
        self.finish(slot, result)
    }

    /// Node count plus the directory's change token, for callers that cache
    pub fn node_count_with_info(&self, dir: DirRef) -> Result<(u32, u32)> {
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.send(Opcode::GetNodeCountWithInfo)?;
            chan.receive()?;
            chan.expect_ok()?;
            let count = chan.get_u32(tag::NODE_COUNT)?;
            let token = chan.get_u32(tag::CHANGE_TOKEN)?;
            Ok((count, token))
        })();
        self.finish(slot, result)
    }

    /// List directory nodes into a caller-sized result buffer
    pub fn list_nodes(
        &self,
        dir: DirRef,
        capacity: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ListResult> {
        if capacity == 0 {
            return Err(ClientError::EmptyBuffer);
        }
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.put_u32(tag::OUT_BUF_LEN, capacity);
            chan.put_u32(tag::CONTEXT, continuation.map_or(0, |t| t.raw()));
            chan.send(Opcode::GetNodeList)?;
            chan.receive()?;
            let status = chan.listing_status()?;
            let data = chan.get_buffer(tag::DATA_BUF)?;
            let count = chan.get_u32(tag::NODE_COUNT)?;
            let continuation = ContinuationToken::from_wire(chan.get_u32(tag::CONTEXT)?);
            Ok(ListResult {
                data,
                count,
                continuation,
                truncated: status == DirStatus::BufferTooSmall,
            })
        })();
        self.finish(slot, result)
    }

    /// Find nodes whose names match a pattern
    ///
    /// Fixed-set kinds carry no pattern on the wire; for the others an empty
    /// pattern list is an argument error.
    pub fn find_nodes(
        &self,
        dir: DirRef,
        pattern: &[&str],
        match_type: PatternMatch,
        capacity: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ListResult> {
        if capacity == 0 {
            return Err(ClientError::EmptyBuffer);
        }
        if !match_type.is_fixed_set() {
            if pattern.is_empty() {
                return Err(ClientError::NullParameter);
            }
            if pattern.iter().any(|p| p.is_empty()) {
                return Err(ClientError::EmptyBuffer);
            }
        }
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.put_u32(tag::OUT_BUF_LEN, capacity);
            if !match_type.is_fixed_set() {
                chan.put_list(tag::NODE_NAME_PATTERN, pattern);
            }
            chan.put_u32(tag::PATTERN_MATCH, match_type as u32);
            chan.put_u32(tag::CONTEXT, continuation.map_or(0, |t| t.raw()));
            chan.send(Opcode::FindNodes)?;
            chan.receive()?;
            let status = chan.listing_status()?;
            let data = chan.get_buffer(tag::DATA_BUF)?;
            let count = chan.get_u32(tag::NODE_COUNT)?;
            let continuation = ContinuationToken::from_wire(chan.get_u32(tag::CONTEXT)?);
            Ok(ListResult {
                data,
                count,
                continuation,
                truncated: status == DirStatus::BufferTooSmall,
            })
        })();
        self.finish(slot, result)
    }

    /// Let the daemon discard the server-side cursor behind an unexhausted
    /// continuation token
    pub fn release_continuation(&self, dir: DirRef, token: ContinuationToken) -> Result<()> {
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.put_u32(tag::CONTEXT, token.raw());
            chan.send(Opcode::ReleaseContinuation)?;
            chan.receive()?;
            chan.expect_ok()
        })();
        self.finish(slot, result)
    }

    /// Open a node by path segments; the new handle is correlated to its
    /// session and carries the originating plugin's name when the daemon
    /// reports one
    pub fn open_node(&self, dir: DirRef, path: &[&str]) -> Result<NodeRef> {
        if path.is_empty() {
            return Err(ClientError::NullParameter);
        }
        if path.iter().any(|p| p.is_empty()) {
            return Err(ClientError::EmptyBuffer);
        }
        let (server_ref, slot, endpoint) = self.session.resolve(dir.raw(), RefKind::Directory)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::DIR_REF, server_ref);
            chan.put_list(tag::NODE_NAME_PATTERN, path);
            chan.send(Opcode::OpenNode)?;
            chan.receive()?;
            chan.expect_ok()?;
            let server_node = chan.get_u32(tag::NODE_REF)?;
            let plugin = chan
                .get_buffer(tag::PLUGIN_NAME)
                .ok()
                .and_then(|b| String::from_utf8(b.to_vec()).ok())
                .filter(|s| !s.is_empty());
            Ok((server_node, plugin))
        })();
        let (server_node, plugin) = self.finish(slot, result)?;

        let client_ref = self.session.refs().register(
            RefKind::Node,
            server_node,
            Session::pid(),
            slot,
            Some(dir.raw()),
            plugin,
        );
        Ok(NodeRef::from_raw(client_ref))
    }

    pub fn close_node(&self, node: NodeRef) -> Result<()> {
        let (server_ref, slot, endpoint) = self.session.resolve(node.raw(), RefKind::Node)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::NODE_REF, server_ref);
            chan.send(Opcode::CloseNode)?;
            chan.receive()?;
            chan.expect_ok()
        })();
        self.finish(slot, result)?;
        self.session.refs().remove(node.raw(), Session::pid());
        Ok(())
    }

    /// Name of the plugin that hosts an open node, when the daemon reported
    /// one at open time
    pub fn node_plugin_name(&self, node: NodeRef) -> Result<Option<String>> {
        self.session.resolve(node.raw(), RefKind::Node)?;
        Ok(self.session.refs().plugin_name(node.raw(), Session::pid()))
    }

    /// Open a record inside a node
    pub fn open_record(
        &self,
        node: NodeRef,
        record_type: &str,
        record_name: &str,
    ) -> Result<RecordRef> {
        if record_type.is_empty() || record_name.is_empty() {
            return Err(ClientError::EmptyBuffer);
        }
        let (server_ref, slot, endpoint) = self.session.resolve(node.raw(), RefKind::Node)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::NODE_REF, server_ref);
            chan.put_buffer(tag::REC_TYPE, record_type.as_bytes());
            chan.put_buffer(tag::REC_NAME, record_name.as_bytes());
            chan.send(Opcode::OpenRecord)?;
            chan.receive()?;
            chan.expect_ok()?;
            chan.get_u32(tag::RECORD_REF)
        })();
        let server_record = self.finish(slot, result)?;

        let client_ref = self.session.refs().register(
            RefKind::Record,
            server_record,
            Session::pid(),
            slot,
            Some(node.raw()),
            None,
        );
        Ok(RecordRef::from_raw(client_ref))
    }

    pub fn close_record(&self, record: RecordRef) -> Result<()> {
        let (server_ref, slot, endpoint) = self.session.resolve(record.raw(), RefKind::Record)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::RECORD_REF, server_ref);
            chan.send(Opcode::CloseRecord)?;
            chan.receive()?;
            chan.expect_ok()
        })();
        self.finish(slot, result)?;
        self.session.refs().remove(record.raw(), Session::pid());
        Ok(())
    }

    /// List records in a node
    ///
    /// How the caller's output capacity travels depends on the endpoint's
    /// negotiated server revision: current servers take the size alone,
    /// legacy servers expect a capacity-declared empty buffer.
    #[allow(clippy::too_many_arguments)]
    pub fn list_records(
        &self,
        node: NodeRef,
        names: &[&str],
        match_type: PatternMatch,
        types: &[&str],
        attr_types: &[&str],
        attrs_only: bool,
        capacity: u32,
        count_hint: u32,
        continuation: Option<ContinuationToken>,
    ) -> Result<ListResult> {
        if capacity == 0 {
            return Err(ClientError::EmptyBuffer);
        }
        if names.is_empty() || types.is_empty() || attr_types.is_empty() {
            return Err(ClientError::NullParameter);
        }
        let (server_ref, slot, endpoint) = self.session.resolve(node.raw(), RefKind::Node)?;
        let result = (|| {
            let mut chan = endpoint.channel();
            chan.clear();
            chan.put_u32(tag::NODE_REF, server_ref);
            if chan.server_version() > 0 {
                chan.put_u32(tag::OUT_BUF_LEN, capacity);
            } else {
                chan.put_capacity_buffer(tag::DATA_BUF, capacity);
            }
            chan.put_list(tag::REC_NAME_LIST, names);
            chan.put_u32(tag::PATTERN_MATCH, match_type as u32);
            chan.put_list(tag::REC_TYPE_LIST, types);
            chan.put_list(tag::ATTR_TYPE_LIST, attr_types);
            chan.put_u32(tag::ATTRS_ONLY, attrs_only as u32);
            chan.put_u32(tag::REC_ENTRY_COUNT, count_hint);
            chan.put_u32(tag::CONTEXT, continuation.map_or(0, |t| t.raw()));
            chan.send(Opcode::ListRecords)?;
            chan.receive()?;
            let status = chan.listing_status()?;
            let data = chan.get_buffer(tag::DATA_BUF)?;
            let count = chan.get_u32(tag::REC_ENTRY_COUNT)?;
            let continuation = ContinuationToken::from_wire(chan.get_u32(tag::CONTEXT)?);
            Ok(ListResult {
                data,
                count,
                continuation,
                truncated: status == DirStatus::BufferTooSmall,
            })
        })();
        self.finish(slot, result)
    }
}
