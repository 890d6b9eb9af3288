// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scoped watchdog timers.
//!
//! A watchdog is armed with a timeout and a signal; if the guard is still
//! alive when the timeout passes, the signal is delivered to *this* process.
//! Dropping the guard cancels the timer. The race between cancellation and
//! expiry is benign: the timer thread either observes the dropped sender or
//! fires, never both.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::error;

use passenger_common::timeout::TimeoutManager;

pub struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Starts the timer. `context` is the diagnostic tag logged when the
    /// watchdog fires, typically `SERVER_NAME` plus `REQUEST_URI`.
    pub fn arm(timeout: Duration, signal: Signal, context: String) -> io::Result<Self> {
        let (cancel, cancel_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || watch(timeout, signal, context, cancel_rx))?;
        Ok(Self {
            cancel: Some(cancel),
            thread: Some(thread),
        })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // dropping the sender wakes the timer thread immediately
        self.cancel.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn watch(timeout: Duration, signal: Signal, context: String, cancel_rx: mpsc::Receiver<()>) {
    let deadline = TimeoutManager::new(timeout);
    loop {
        match cancel_rx.recv_timeout(deadline.remaining()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                if deadline.expired() {
                    error!(
                        "watchdog expired after {:?} ({context}), sending {signal} to this process",
                        deadline.timeout()
                    );
                    let _ = signal::kill(Pid::this(), signal);
                    return;
                }
            }
        }
    }
}
