// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use libc::{nfds_t, poll, pollfd, POLLERR, POLLHUP, POLLIN};
use std::os::fd::RawFd;

use super::errors::PollError;

/// Waits until at least one of `fds` is readable or hung up, or until
/// `timeout_ms` elapses (`-1` waits forever). Returns one readiness flag per
/// descriptor, in input order; on timeout every flag is false.
///
/// EINTR and EAGAIN restart the wait, so a trapped signal alone never
/// surfaces as an error here.
pub fn wait_readable(fds: &[RawFd], timeout_ms: i32) -> Result<Vec<bool>, PollError> {
    let mut poll_fds: Vec<pollfd> = fds
        .iter()
        .map(|&fd| pollfd {
            fd,
            events: POLLIN,
            revents: 0,
        })
        .collect();

    loop {
        let poll_result =
            unsafe { poll(poll_fds.as_mut_ptr(), poll_fds.len() as nfds_t, timeout_ms) };
        match poll_result {
            -1 => match nix::Error::last_raw() {
                libc::EAGAIN | libc::EINTR => continue,
                errno => return Err(PollError::Poll(errno)),
            },
            _ => {
                return Ok(poll_fds
                    .iter()
                    .map(|p| p.revents & (POLLIN | POLLHUP | POLLERR) != 0)
                    .collect())
            }
        }
    }
}
