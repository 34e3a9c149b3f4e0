//! Session controller
//!
//! Process-wide state machine coordinating local-channel reuse, connection
//! reference counting, flavor exclusivity and fork recovery. This is the
//! only component that touches slot 0's lifecycle and the connection
//! counter.
//!
//! The state lock covers short bookkeeping windows only; it is never held
//! across a request/reply round trip. Count and slot manipulation on the
//! open paths go through lease guards whose drop rolls an uncommitted open
//! back, so no error path can leak a count increment or a half-opened slot.
//!
//! A fork occurring while a call is in flight is not handled: recovery is
//! only guaranteed to run before the next call begins. That call, and every
//! later one, sees the endpoints closed and the correlation table empty.

use crate::endpoint::{Channel, Endpoint};
use crate::endpoint_table::{EndpointTable, DEFAULT_MAX_REMOTE_SESSIONS, LOCAL_SLOT};
use crate::error::{ClientError, Result};
use crate::ref_table::RefTable;
use crate::refs::RefKind;
use crate::transport::{
    Transport, DEFAULT_REMOTE_PORT, LOCAL_SERVICE_SOCKET, SERVICE_SOCKET,
};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Which daemon flavor the shared local channel serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalFlavor {
    Standard,
    LocalOnly,
}

/// Process-level configuration; defaults match a production host
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_remote_sessions: usize,
    pub service_socket: PathBuf,
    pub local_service_socket: PathBuf,
    pub default_remote_port: u16,
    /// Set when the process runs under instruction-set translation and must
    /// declare the opposite byte order on the wire. Host detection is the
    /// embedder's business; the default is no translation.
    pub translated: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_remote_sessions: DEFAULT_MAX_REMOTE_SESSIONS,
            service_socket: PathBuf::from(SERVICE_SOCKET),
            local_service_socket: PathBuf::from(LOCAL_SERVICE_SOCKET),
            default_remote_port: DEFAULT_REMOTE_PORT,
            translated: false,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    connections: u32,
    standard_in_use: bool,
    local_only_in_use: bool,
    forked: bool,
}

/// Process-wide session controller
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    wire_little_endian: bool,
    state: Mutex<SessionState>,
    endpoints: EndpointTable,
    refs: RefTable,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let wire_little_endian = cfg!(target_endian = "little") != config.translated;
        Self {
            wire_little_endian,
            state: Mutex::new(SessionState {
                connections: 0,
                standard_in_use: false,
                local_only_in_use: false,
                // Starts set so the first operation performs one clean lazy
                // reset of whatever state an exec or fork left behind.
                forked: true,
            }),
            endpoints: EndpointTable::new(config.max_remote_sessions),
            refs: RefTable::new(),
            config,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn refs(&self) -> &RefTable {
        &self.refs
    }

    pub(crate) fn endpoints(&self) -> &EndpointTable {
        &self.endpoints
    }

    pub(crate) fn pid() -> u32 {
        std::process::id()
    }

    /// Open sessions currently counted against the shared local channel
    pub fn connection_count(&self) -> u32 {
        self.lock_state().connections
    }

    pub fn local_channel_open(&self) -> bool {
        self.endpoints.local().is_some()
    }

    /// Count of correlation entries; diagnostic only
    pub fn reference_count(&self) -> usize {
        self.refs.len()
    }

    /// Count of live endpoints across all slots; diagnostic only
    pub fn open_endpoints(&self) -> usize {
        self.endpoints.open_slots()
    }

    /// To be invoked from the hosting process's after-fork child hook
    ///
    /// Handles and sockets are not meaningfully inherited across a fork; the
    /// next operation discards every endpoint and correlation entry before
    /// proceeding. Calling this twice before the next operation collapses to
    /// one reset.
    pub fn notify_fork_child(&self) {
        let mut st = self.lock_state();
        st.forked = true;
        st.standard_in_use = false;
        st.local_only_in_use = false;
    }

    /// Run the pending fork reset, if one is flagged; head of every public
    /// operation
    pub(crate) fn ensure_fresh(&self) {
        let mut st = self.lock_state();
        if st.forked {
            self.reset_all(&mut st);
        }
    }

    fn reset_all(&self, st: &mut SessionState) {
        debug!("resetting all sessions");
        self.refs.clear_all();
        self.endpoints.close_all();
        st.connections = 0;
        st.standard_in_use = false;
        st.local_only_in_use = false;
        st.forked = false;
    }

    /// Acquire the shared local channel for one more session of the given
    /// flavor
    ///
    /// Opening one flavor while the other is active fails without touching
    /// the active flavor's count. The returned lease must be committed once
    /// the open RPC succeeds; dropping it uncommitted rolls the count back.
    pub(crate) fn open_local(&self, flavor: LocalFlavor) -> Result<(Arc<Endpoint>, LocalLease<'_>)> {
        let mut st = self.lock_state();
        if st.forked {
            self.reset_all(&mut st);
        }
        match flavor {
            LocalFlavor::Standard if st.local_only_in_use => {
                return Err(ClientError::LocalOnlyDaemonInUse)
            }
            LocalFlavor::LocalOnly if st.standard_in_use => {
                return Err(ClientError::StandardDaemonInUse)
            }
            _ => {}
        }

        let path = match flavor {
            LocalFlavor::Standard => &self.config.service_socket,
            LocalFlavor::LocalOnly => &self.config.local_service_socket,
        };
        // Absent registration means no daemon, which callers may treat as
        // retryable; a present-but-refusing socket is reported as the
        // generic session failure instead.
        if !path.exists() {
            return Err(ClientError::ServiceNotRunning);
        }

        let endpoint = match self.endpoints.local() {
            Some(ep) => ep,
            None => {
                let transport = Transport::connect_local(path).map_err(|e| {
                    debug!(error = %e, path = %path.display(), "local connect failed");
                    match e.kind() {
                        io::ErrorKind::NotFound => ClientError::ServiceNotRunning,
                        _ => ClientError::CannotAccessSession,
                    }
                })?;
                self.endpoints
                    .install_local(Channel::new(transport, self.wire_little_endian))
            }
        };

        st.connections += 1;
        match flavor {
            LocalFlavor::Standard => st.standard_in_use = true,
            LocalFlavor::LocalOnly => st.local_only_in_use = true,
        }
        debug!(connections = st.connections, ?flavor, "local channel acquired");

        Ok((
            endpoint,
            LocalLease {
                session: self,
                armed: true,
            },
        ))
    }

    /// Give one session on the shared local channel back; the channel itself
    /// closes only when the last session is gone
    pub(crate) fn release_local(&self) {
        let mut st = self.lock_state();
        if st.connections > 0 {
            st.connections -= 1;
        }
        if st.connections == 0 {
            self.endpoints.release(LOCAL_SLOT);
            st.standard_in_use = false;
            st.local_only_in_use = false;
            debug!("local channel closed");
        }
    }

    /// Lease a fresh remote slot and connect it
    ///
    /// Every call creates a new endpoint; remote sessions have no shared
    /// reuse, only the slot-count bound.
    pub(crate) fn open_remote(
        &self,
        host: &str,
        port: Option<u16>,
    ) -> Result<(usize, Arc<Endpoint>, RemoteLease<'_>)> {
        self.ensure_fresh();
        let slot = self.endpoints.reserve_remote()?;
        let port = port.unwrap_or(self.config.default_remote_port);
        match Transport::connect_remote(host, port) {
            Ok(transport) => {
                let endpoint = self
                    .endpoints
                    .fill_remote(slot, Channel::new(transport, self.wire_little_endian));
                debug!(slot, host, port, "remote endpoint opened");
                Ok((
                    slot,
                    endpoint,
                    RemoteLease {
                        session: self,
                        slot,
                        armed: true,
                    },
                ))
            }
            Err(e) => {
                debug!(error = %e, host, port, "remote connect failed");
                self.endpoints.cancel_reservation(slot);
                Err(ClientError::CannotAccessSession)
            }
        }
    }

    /// Close a remote slot after its session closed normally
    pub(crate) fn discard_remote(&self, slot: usize) {
        self.endpoints.release(slot);
    }

    /// Tear an endpoint down after a transport failure
    ///
    /// Fatal to this endpoint only: correlation entries pointing here are
    /// left to fail lazily on their next resolve. For slot 0 the session
    /// count and flavor flags stay as they are; the next open reconnects.
    pub(crate) fn fail_endpoint(&self, slot: usize) {
        warn!(slot, "transport failure, endpoint torn down");
        self.endpoints.release(slot);
    }

    /// Resolve a handle to (server handle, slot, endpoint), running any
    /// pending fork reset first
    pub(crate) fn resolve(&self, raw: u32, kind: RefKind) -> Result<(u32, usize, Arc<Endpoint>)> {
        if raw == 0 {
            return Err(ClientError::InvalidReference);
        }
        self.ensure_fresh();
        let (server_ref, slot) = self.refs.resolve(raw, kind, Self::pid())?;
        let endpoint = self.endpoints.get(slot)?;
        Ok((server_ref, slot, endpoint))
    }
}

/// Owned claim on one counted session of the shared local channel
///
/// Commit after the open RPC succeeds; dropping an uncommitted lease rolls
/// the acquisition back so error paths cannot leak the count.
pub(crate) struct LocalLease<'a> {
    session: &'a Session,
    armed: bool,
}

impl LocalLease<'_> {
    pub(crate) fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for LocalLease<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.release_local();
        }
    }
}

/// Owned claim on a freshly leased remote slot
pub(crate) struct RemoteLease<'a> {
    session: &'a Session,
    slot: usize,
    armed: bool,
}

impl RemoteLease<'_> {
    pub(crate) fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for RemoteLease<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.endpoints.release(self.slot);
        }
    }
}
