// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::fcntl::OFlag;
use nix::unistd;

/// A CLOEXEC pipe pair whose write end can be released independently.
///
/// Closing the write end while something polls the read end is a wakeup: the
/// poller observes EOF on the next readiness wait. This is the mechanism
/// behind the graceful-termination pipe.
pub struct Pipe {
    read: OwnedFd,
    write: Option<OwnedFd>,
}

impl Pipe {
    pub fn new() -> nix::Result<Self> {
        let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC)?;
        Ok(Self {
            read,
            write: Some(write),
        })
    }

    pub fn read_raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Closes the write end, waking any poller on the read end. A no-op if
    /// the write end is already gone.
    pub fn close_write(&mut self) {
        self.write = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unix_utils::wait_readable;

    #[test]
    fn closing_the_write_end_wakes_a_reader() {
        let mut pipe = Pipe::new().unwrap();
        // nothing readable while the write end is open
        let ready = wait_readable(&[pipe.read_raw_fd()], 0).unwrap();
        assert_eq!(vec![false], ready);

        pipe.close_write();
        let ready = wait_readable(&[pipe.read_raw_fd()], 1000).unwrap();
        assert_eq!(vec![true], ready);

        // and the read end reports EOF
        let mut buf = [0u8; 1];
        let n = unsafe { libc::read(pipe.read_raw_fd(), buf.as_mut_ptr().cast(), 1) };
        assert_eq!(0, n);
    }

    #[test]
    fn data_on_the_pipe_is_readable() {
        let pipe = Pipe::new().unwrap();
        let write = pipe.write.as_ref().unwrap();
        let byte = [1u8];
        let n = unsafe { libc::write(write.as_raw_fd(), byte.as_ptr().cast(), 1) };
        assert_eq!(1, n);
        let ready = wait_readable(&[pipe.read_raw_fd()], 1000).unwrap();
        assert_eq!(vec![true], ready);
    }
}
