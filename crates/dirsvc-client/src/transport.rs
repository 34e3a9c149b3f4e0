//! Blocking transports beneath the endpoints
//!
//! Two channel families reach a daemon: the shared local channel is a
//! Unix-domain socket registered under a well-known name, remote channels
//! are plain TCP. Both carry the same framed protocol; this module only
//! connects, shuttles bytes, and shuts down.
//!
//! Timeout policy deliberately lives here and not above: the endpoint layer
//! blocks until a full reply arrives or the transport reports an error.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::Path;

/// Well-known service socket of the standard daemon
pub const SERVICE_SOCKET: &str = "/var/run/dirsvcd/api.sock";

/// Well-known service socket of the local-only daemon flavor
pub const LOCAL_SERVICE_SOCKET: &str = "/var/run/dirsvcd/local.sock";

/// TCP port used when the caller supplies none
pub const DEFAULT_REMOTE_PORT: u16 = 625;

/// One connected byte-stream channel to a daemon
#[derive(Debug)]
pub enum Transport {
    Local(UnixStream),
    Remote(TcpStream),
}

impl Transport {
    /// Connect to a daemon's service socket
    pub fn connect_local(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        Ok(Transport::Local(stream))
    }

    /// Connect to a remote daemon over TCP
    pub fn connect_remote(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nodelay(true).ok();
        Ok(Transport::Remote(stream))
    }

    /// Close both directions; errors are swallowed, teardown always proceeds
    pub fn shutdown(&self) {
        match self {
            Transport::Local(s) => {
                s.shutdown(Shutdown::Both).ok();
            }
            Transport::Remote(s) => {
                s.shutdown(Shutdown::Both).ok();
            }
        }
    }
}

/// Probe whether a daemon is reachable at a service socket without keeping
/// the connection
pub fn service_available(path: &Path) -> bool {
    UnixStream::connect(path).is_ok()
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Local(s) => s.read(buf),
            Transport::Remote(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Local(s) => s.write(buf),
            Transport::Remote(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Local(s) => s.flush(),
            Transport::Remote(s) => s.flush(),
        }
    }
}
