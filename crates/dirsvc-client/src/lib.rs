//! Client runtime for the dirsvc daemon
//!
//! This crate is the transport-and-correlation substrate every directory
//! call in a process relies on:
//!
//! - a reference-correlation table mapping client-visible handles to the
//!   server-side handle, owning endpoint slot and owning process, with
//!   parent links between the five handle kinds
//! - an endpoint table multiplexing the shared local channel (slot 0) and a
//!   bounded set of TCP proxy channels, each serializing one request/reply
//!   cycle at a time under its own lock
//! - a session controller owning local-channel reuse, connection reference
//!   counting, daemon-flavor exclusivity and fork recovery
//!
//! All calls are synchronous and may block for one round trip; there is no
//! event loop and no cancellation. Embedders that fork must call
//! [`Session::notify_fork_child`] from their after-fork hook; recovery then
//! runs before the next call.
//!
//! # Example
//!
//! ```no_run
//! use dirsvc_client::DirClient;
//!
//! let client = DirClient::shared();
//! let session = client.open_session()?;
//! let nodes = client.list_nodes(session, 4096, None)?;
//! println!("{} nodes", nodes.count);
//! client.close_session(session)?;
//! # Ok::<(), dirsvc_client::ClientError>(())
//! ```

pub mod client;
pub mod endpoint;
pub mod endpoint_table;
pub mod error;
pub mod ref_table;
pub mod refs;
pub mod session;
pub mod transport;

pub use client::{DirClient, ListResult, DEFAULT_LOCAL_DB, PROXY_VERSION_INFO};
pub use endpoint::{Channel, Endpoint, EndpointKind};
pub use endpoint_table::{EndpointTable, DEFAULT_MAX_REMOTE_SESSIONS, LOCAL_SLOT};
pub use error::{ClientError, Result};
pub use ref_table::RefTable;
pub use refs::{
    AttrListRef, AttrValueListRef, ContinuationToken, DirRef, NodeRef, PatternMatch, RecordRef,
    RefKind,
};
pub use session::{LocalFlavor, Session, SessionConfig};
pub use transport::{
    service_available, Transport, DEFAULT_REMOTE_PORT, LOCAL_SERVICE_SOCKET, SERVICE_SOCKET,
};
