// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::os::unix::prelude::AsRawFd;
use std::path::Path;

use nix::sys::socket::{bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr};

/// Listen backlog for handler endpoints.
pub const BACKLOG_SIZE: i32 = 50;

fn socket_stream() -> nix::Result<OwnedFd> {
    socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )
}

/// Binds a listening socket on a filesystem path.
pub fn bind_path<P: AsRef<Path>>(path: P) -> io::Result<UnixListener> {
    let sock = socket_stream()?;
    let addr = UnixAddr::new(path.as_ref())?;
    bind(sock.as_raw_fd(), &addr)?;
    listen(&sock, Backlog::new(BACKLOG_SIZE)?)?;
    Ok(sock.into())
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::os::unix::prelude::AsRawFd;

    use nix::sys::socket::{bind, connect, listen, Backlog, UnixAddr};

    use super::{socket_stream, BACKLOG_SIZE};

    /// Binds a listener in the abstract socket namespace. `name` must not
    /// include the leading NUL; the kernel address form adds it.
    pub fn bind_abstract(name: &[u8]) -> io::Result<UnixListener> {
        let sock = socket_stream()?;
        let addr = UnixAddr::new_abstract(name)?;
        bind(sock.as_raw_fd(), &addr)?;
        listen(&sock, Backlog::new(BACKLOG_SIZE)?)?;
        Ok(sock.into())
    }

    pub fn connect_abstract(name: &[u8]) -> io::Result<UnixStream> {
        let sock = socket_stream()?;
        let addr = UnixAddr::new_abstract(name)?;
        connect(sock.as_raw_fd(), &addr)?;
        Ok(sock.into())
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;
