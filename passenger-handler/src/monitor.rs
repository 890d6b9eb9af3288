// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The lifecycle monitor: one readiness wait over everything that can end or
//! advance an iteration of the main loop.

use std::os::fd::RawFd;

use nix::sys::signal::Signal;

use passenger_common::unix_utils::{wait_readable, PollError};

use crate::signals;

/// Outcome of one readiness wait, highest priority first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wake {
    /// The hard termination signal arrived: exit the loop immediately.
    HardTermination,
    /// EOF on the owner pipe: the web server is gone, exit the loop.
    OwnerGone,
    /// The soft termination signal arrived: drain, then exit.
    SoftTermination,
    /// The graceful-termination pipe was closed: stop accepting, exit.
    Drain,
    /// A client is waiting on the listener.
    Connection,
}

pub struct LifecycleMonitor {
    signal_fd: RawFd,
    owner_fd: RawFd,
    graceful_fd: RawFd,
    listener_fd: RawFd,
    hard_signum: i32,
    soft_signum: i32,
}

impl LifecycleMonitor {
    pub fn new(
        signal_fd: RawFd,
        owner_fd: RawFd,
        graceful_fd: RawFd,
        listener_fd: RawFd,
        hard: Signal,
        soft: Signal,
    ) -> Self {
        Self {
            signal_fd,
            owner_fd,
            graceful_fd,
            listener_fd,
            hard_signum: hard as i32,
            soft_signum: soft as i32,
        }
    }

    /// Blocks until one of the wait sources is ready and reports the
    /// highest-priority fate. Wakeups that carry nothing actionable (for
    /// example a trapped signal that is neither termination signal) restart
    /// the wait.
    pub fn wait(&self) -> Result<Wake, PollError> {
        loop {
            let ready = wait_readable(
                &[
                    self.signal_fd,
                    self.owner_fd,
                    self.graceful_fd,
                    self.listener_fd,
                ],
                -1,
            )?;

            let delivered = if ready[0] {
                signals::drain_signal_pipe(self.signal_fd)
            } else {
                Vec::new()
            };
            if delivered.contains(&self.hard_signum) {
                return Ok(Wake::HardTermination);
            }
            if ready[1] {
                return Ok(Wake::OwnerGone);
            }
            if delivered.contains(&self.soft_signum) {
                return Ok(Wake::SoftTermination);
            }
            if ready[2] {
                return Ok(Wake::Drain);
            }
            if ready[3] {
                return Ok(Wake::Connection);
            }
        }
    }
}
