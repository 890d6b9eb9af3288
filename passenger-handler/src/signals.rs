// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Signal discipline for the main loop.
//!
//! Asynchronous signals are turned into messages: the installed handlers
//! push one byte per delivered signal onto a process-wide self-pipe, and the
//! lifecycle monitor drains that pipe as one of its wait sources. `SIGABRT`
//! is the exception: it only raises a flag the loop reads at the iteration
//! boundary, turning an abort into a request failure instead of a process
//! death.
//!
//! On loop entry every trappable signal is reset to its default disposition
//! and the previous one is remembered; on exit all of them are reinstalled.

use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicI32};
use std::sync::OnceLock;

use nix::fcntl::OFlag;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd;

/// Write end of the self-pipe, readable from a signal handler context.
static SIGNAL_PIPE_WR: AtomicI32 = AtomicI32::new(-1);

/// Read end (owned for the process lifetime) plus the raw write end.
static SIGNAL_PIPE: OnceLock<(OwnedFd, RawFd)> = OnceLock::new();

static ABORT_DELIVERED: AtomicBool = AtomicBool::new(false);

extern "C" fn forward_to_pipe(signum: libc::c_int) {
    let fd = SIGNAL_PIPE_WR.load(SeqCst);
    if fd >= 0 {
        let byte = [signum as u8];
        // write(2) is async-signal-safe; a full pipe drops the byte, which
        // is harmless because any earlier byte already wakes the monitor.
        unsafe { libc::write(fd, byte.as_ptr().cast(), 1) };
    }
}

extern "C" fn note_abort(_signum: libc::c_int) {
    ABORT_DELIVERED.store(true, SeqCst);
}

fn signal_pipe() -> &'static (OwnedFd, RawFd) {
    SIGNAL_PIPE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let (read, write) = unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK).unwrap();
        let write_raw = write.into_raw_fd();
        SIGNAL_PIPE_WR.store(write_raw, SeqCst);
        (read, write_raw)
    })
}

/// Read end of the self-pipe, creating the pipe on first use.
pub fn signal_pipe_fd() -> RawFd {
    signal_pipe().0.as_raw_fd()
}

/// Drains every pending byte from a (non-blocking) signal pipe, returning
/// the delivered signal numbers in arrival order.
pub fn drain_signal_pipe(fd: RawFd) -> Vec<i32> {
    let mut delivered = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            return delivered;
        }
        delivered.extend(buf[..n as usize].iter().map(|&b| i32::from(b)));
    }
}

/// True once if `SIGABRT` arrived since the last call.
pub fn take_abort_flag() -> bool {
    ABORT_DELIVERED.swap(false, SeqCst)
}

/// The dispositions recorded at loop entry, reinstalled by [`restore`].
///
/// [`restore`]: SavedDispositions::restore
pub struct SavedDispositions {
    saved: Vec<(Signal, SigAction)>,
}

impl SavedDispositions {
    /// Resets every trappable signal to its default disposition, remembering
    /// the previous one, then installs the loop's handler set: `SIGHUP` and
    /// `SIGPIPE` ignored, `SIGABRT` flag-raising, and the two termination
    /// signals forwarding into the self-pipe. Untrappable signals are
    /// skipped silently.
    pub fn install(hard: Signal, soft: Signal) -> nix::Result<Self> {
        // the self-pipe must exist before any forwarding handler can run
        let _ = signal_pipe_fd();

        let default_action =
            SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let mut saved = Vec::new();
        for signal in Signal::iterator() {
            if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) {
                continue;
            }
            match unsafe { signal::sigaction(signal, &default_action) } {
                Ok(previous) => saved.push((signal, previous)),
                Err(_) => continue,
            }
        }
        let dispositions = Self { saved };

        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let abort = SigAction::new(
            SigHandler::Handler(note_abort),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let forward = SigAction::new(
            SigHandler::Handler(forward_to_pipe),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        unsafe {
            signal::sigaction(Signal::SIGHUP, &ignore)?;
            // broken pipes must surface as write errors, not process death
            signal::sigaction(Signal::SIGPIPE, &ignore)?;
            signal::sigaction(Signal::SIGABRT, &abort)?;
            signal::sigaction(hard, &forward)?;
            signal::sigaction(soft, &forward)?;
        }
        Ok(dispositions)
    }

    /// Reinstalls every disposition recorded at entry.
    pub fn restore(self) {
        for (signal, action) in &self.saved {
            let _ = unsafe { signal::sigaction(*signal, action) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_signals_land_in_the_pipe_and_dispositions_come_back() {
        extern "C" fn marker(_signum: libc::c_int) {}
        let marker_action = SigAction::new(
            SigHandler::Handler(marker),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { signal::sigaction(Signal::SIGUSR2, &marker_action) }.unwrap();

        let saved = SavedDispositions::install(Signal::SIGTERM, Signal::SIGUSR1).unwrap();

        signal::raise(Signal::SIGTERM).unwrap();
        signal::raise(Signal::SIGUSR1).unwrap();
        let delivered = drain_signal_pipe(signal_pipe_fd());
        assert!(delivered.contains(&(Signal::SIGTERM as i32)));
        assert!(delivered.contains(&(Signal::SIGUSR1 as i32)));

        signal::raise(Signal::SIGABRT).unwrap();
        assert!(take_abort_flag());
        assert!(!take_abort_flag());

        saved.restore();
        let current = unsafe { signal::sigaction(Signal::SIGUSR2, &marker_action) }.unwrap();
        assert_eq!(SigHandler::Handler(marker), current.handler());
    }
}
