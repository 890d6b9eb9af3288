// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Private listening endpoints for request handlers.
//!
//! Every handler owns exactly one endpoint under a freshly generated random
//! name. On Linux the abstract socket namespace is preferred because it needs
//! no filesystem cleanup; everywhere else (or when the caller forbids it) the
//! endpoint is a socket file under `/tmp` with owner-only permissions that is
//! unlinked when the endpoint goes away.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::os::unix::prelude::{AsRawFd, RawFd};
use std::path::Path;

use tracing::debug;

use passenger_common::identity;

/// Capacity of `sockaddr_un.sun_path`, including the trailing NUL.
#[cfg(target_os = "linux")]
pub const UNIX_PATH_MAX: usize = 108;
#[cfg(not(target_os = "linux"))]
pub const UNIX_PATH_MAX: usize = 104;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketKind {
    /// Kernel-managed name, Linux only. No inode, nothing to unlink.
    Abstract,
    /// A socket file under `/tmp`, permissions `0600`.
    Filesystem,
}

pub struct ListenEndpoint {
    listener: UnixListener,
    name: String,
    kind: SocketKind,
}

impl ListenEndpoint {
    /// Binds a listener on a freshly generated private name.
    ///
    /// With `allow_abstract` the abstract namespace is attempted first and
    /// the filesystem is only a fallback for platforms that lack it. Name
    /// collisions regenerate the identity and retry until a free name is
    /// found.
    pub fn create(prefix: &str, allow_abstract: bool) -> io::Result<Self> {
        if allow_abstract {
            match Self::create_abstract() {
                Ok(endpoint) => return Ok(endpoint),
                Err(err) if abstract_namespace_unsupported(&err) => {
                    debug!("abstract namespace unavailable ({err}), using a socket file");
                }
                Err(err) => return Err(err),
            }
        }
        Self::create_filesystem(prefix)
    }

    #[cfg(target_os = "linux")]
    fn create_abstract() -> io::Result<Self> {
        loop {
            let name = identity::hex_id(UNIX_PATH_MAX - 2);
            match crate::platform::bind_abstract(name.as_bytes()) {
                Ok(listener) => {
                    return Ok(Self {
                        listener,
                        name,
                        kind: SocketKind::Abstract,
                    })
                }
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
                Err(err) => return Err(err),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn create_abstract() -> io::Result<Self> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn create_filesystem(prefix: &str) -> io::Result<Self> {
        loop {
            let mut name = format!("/tmp/{}.{}", prefix, identity::base64_id());
            name.truncate(UNIX_PATH_MAX - 1);
            match crate::platform::bind_path(&name) {
                Ok(listener) => {
                    fs::set_permissions(&name, fs::Permissions::from_mode(0o600))?;
                    return Ok(Self {
                        listener,
                        name,
                        kind: SocketKind::Filesystem,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// The advertised socket name. For abstract endpoints this is the name
    /// *without* the leading NUL; clients connecting by hand must prepend it.
    pub fn socket_name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn is_filesystem(&self) -> bool {
        self.kind == SocketKind::Filesystem
    }

    /// Blocks until a client connects.
    pub fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept()?;
        Ok(stream)
    }

    /// Releases the endpoint. Equivalent to dropping it.
    pub fn close(self) {}
}

impl AsRawFd for ListenEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for ListenEndpoint {
    fn drop(&mut self) {
        if self.kind == SocketKind::Filesystem {
            // best effort; a stale file is swept with the rest of /tmp
            let _ = fs::remove_file(&self.name);
        }
    }
}

fn abstract_namespace_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }
    matches!(
        err.raw_os_error(),
        Some(libc::EAFNOSUPPORT | libc::EOPNOTSUPP | libc::EPROTONOSUPPORT | libc::ENOSYS)
    )
}

/// Connects to a handler endpoint by its advertised name. Names starting
/// with `/` or `.` are filesystem paths; anything else lives in the abstract
/// namespace.
pub fn connect(socket_name: &str) -> io::Result<UnixStream> {
    if socket_name.starts_with(['.', '/']) {
        return UnixStream::connect(Path::new(socket_name));
    }
    #[cfg(target_os = "linux")]
    {
        crate::platform::connect_abstract(socket_name.as_bytes())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn filesystem_endpoint_creates_an_owner_only_socket_file() {
        let endpoint = ListenEndpoint::create("test-handler", false).unwrap();
        assert!(endpoint.is_filesystem());
        assert!(endpoint.socket_name().starts_with("/tmp/test-handler."));
        assert!(endpoint.socket_name().len() < UNIX_PATH_MAX);

        let metadata = fs::metadata(endpoint.socket_name()).unwrap();
        assert_eq!(0o600, metadata.permissions().mode() & 0o777);
    }

    #[test]
    fn filesystem_endpoint_unlinks_its_file_on_drop() {
        let endpoint = ListenEndpoint::create("test-handler", false).unwrap();
        let name = endpoint.socket_name().to_string();
        assert!(Path::new(&name).exists());
        endpoint.close();
        assert!(!Path::new(&name).exists());
    }

    #[test]
    fn filesystem_endpoint_accepts_a_connection_by_path() {
        let endpoint = ListenEndpoint::create("test-handler", false).unwrap();
        let mut client = connect(endpoint.socket_name()).unwrap();
        let mut served = endpoint.accept().unwrap();
        client.write_all(b"ping").unwrap();
        drop(client);
        let mut received = Vec::new();
        served.read_to_end(&mut received).unwrap();
        assert_eq!(b"ping".as_ref(), received);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn abstract_endpoint_round_trips_without_an_inode() {
        let endpoint = ListenEndpoint::create("test-handler", true).unwrap();
        assert_eq!(SocketKind::Abstract, endpoint.kind());
        assert!(!endpoint.socket_name().starts_with('\0'));
        assert_eq!(UNIX_PATH_MAX - 2, endpoint.socket_name().len());

        let mut client = connect(endpoint.socket_name()).unwrap();
        let mut served = endpoint.accept().unwrap();
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        served.read_exact(&mut buf).unwrap();
        assert_eq!(b"ping", &buf);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn abstract_names_collide_with_a_live_endpoint() {
        let endpoint = ListenEndpoint::create("test-handler", true).unwrap();
        let taken = crate::platform::bind_abstract(endpoint.socket_name().as_bytes());
        assert_eq!(
            io::ErrorKind::AddrInUse,
            taken.expect_err("name should be taken").kind()
        );
    }
}
