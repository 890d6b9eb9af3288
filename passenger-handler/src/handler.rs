// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The request handler main loop.
//!
//! State machine:
//!
//! ```text
//!  Init → Running → Draining → Exited
//!            │          ▲
//!            └──────────┘   soft termination or memory ceiling
//!            │
//!            └──→ Exited    hard termination or owner gone
//! ```
//!
//! Requests are served strictly sequentially. `iterations` increments before
//! each readiness wait and `processed_requests` after each client close, so
//! concurrent readers observe values consistent with some moment between
//! iterations.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use nix::sys::signal::Signal;
use tracing::{debug, error, info};

use passenger_common::unix_utils::Pipe;
use passenger_ipc::endpoint::ListenEndpoint;
use passenger_ipc::frame::{self, FrameError, RequestHeaders};

use crate::app::Application;
use crate::config::Config;
use crate::constants::{DRAIN_TIMEOUT, REQUEST_TIMEOUT, SOCKET_NAME_PREFIX};
use crate::monitor::{LifecycleMonitor, Wake};
use crate::signals::{self, SavedDispositions};
use crate::watchdog::Watchdog;

/// Per-handler parameters supplied by the spawning process.
#[derive(Clone, Debug)]
pub struct HandlerOptions {
    /// Resident-memory ceiling in bytes; `0` disables the check.
    pub memory_limit: usize,
    /// Signal that exits the loop immediately.
    pub hard_termination_signal: Signal,
    /// Signal that finishes the in-flight request and then exits.
    pub soft_termination_signal: Signal,
    /// Prefix for socket files under `/tmp`.
    pub socket_prefix: String,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            memory_limit: 0,
            hard_termination_signal: Signal::SIGTERM,
            soft_termination_signal: Signal::SIGUSR1,
            socket_prefix: SOCKET_NAME_PREFIX.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LoopState {
    Idle,
    Running,
    Stopped,
}

pub struct RequestHandler {
    socket_name: String,
    endpoint: Mutex<Option<ListenEndpoint>>,
    owner_pipe: Mutex<Option<OwnedFd>>,
    app: Arc<dyn Application>,
    options: HandlerOptions,
    iterations: AtomicU64,
    processed_requests: AtomicU64,
    graceful: Mutex<Option<Pipe>>,
    drain_watchdog: Mutex<Option<Watchdog>>,
    state: Mutex<LoopState>,
    state_cv: Condvar,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
    cleaned_up: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RequestHandler {
    /// Creates a handler listening on a freshly generated private socket.
    ///
    /// The socket exists from this point on, so the spawner can read
    /// [`socket_name`](Self::socket_name) immediately; the loop itself runs
    /// via [`main_loop`](Self::main_loop) or
    /// [`start_main_loop_thread`](Self::start_main_loop_thread).
    pub fn new(
        owner_pipe: OwnedFd,
        app: Arc<dyn Application>,
        options: HandlerOptions,
    ) -> anyhow::Result<Arc<Self>> {
        let endpoint = ListenEndpoint::create(
            &options.socket_prefix,
            Config::get().abstract_namespace_allowed,
        )
        .context("failed to create the handler socket")?;
        let socket_name = endpoint.socket_name().to_string();

        Ok(Arc::new(Self {
            socket_name,
            endpoint: Mutex::new(Some(endpoint)),
            owner_pipe: Mutex::new(Some(owner_pipe)),
            app,
            options,
            iterations: AtomicU64::new(0),
            processed_requests: AtomicU64::new(0),
            graceful: Mutex::new(None),
            drain_watchdog: Mutex::new(None),
            state: Mutex::new(LoopState::Idle),
            state_cv: Condvar::new(),
            loop_thread: Mutex::new(None),
            cleaned_up: AtomicBool::new(false),
        }))
    }

    /// The advertised socket name. Abstract-namespace names are exposed
    /// without the leading NUL; clients prepend it when connecting.
    pub fn socket_name(&self) -> &str {
        &self.socket_name
    }

    /// Loop turns taken so far. One per readiness wait, whatever its outcome.
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Relaxed)
    }

    /// Requests fully handled so far, independent of application outcome.
    pub fn processed_requests(&self) -> u64 {
        self.processed_requests.load(Relaxed)
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.state) == LoopState::Running
    }

    /// Runs the accept loop on the calling thread until a termination cause
    /// fires. Installs the signal dispositions on entry and restores them on
    /// exit, whichever path the exit takes.
    pub fn main_loop(&self) -> anyhow::Result<()> {
        let result = self.main_loop_impl();
        self.set_state(LoopState::Stopped);
        result
    }

    fn main_loop_impl(&self) -> anyhow::Result<()> {
        let dispositions = SavedDispositions::install(
            self.options.hard_termination_signal,
            self.options.soft_termination_signal,
        )
        .context("failed to install signal dispositions")?;

        let result = self.run_with_graceful_pipe();

        dispositions.restore();
        result
    }

    fn run_with_graceful_pipe(&self) -> anyhow::Result<()> {
        let graceful_read_fd = {
            let mut graceful = lock(&self.graceful);
            let pipe = Pipe::new().context("failed to create the graceful-termination pipe")?;
            let fd = pipe.read_raw_fd();
            *graceful = Some(pipe);
            fd
        };

        self.set_state(LoopState::Running);
        let result = self.run_accept_loop(graceful_read_fd);

        // close both ends, whatever state they are in
        *lock(&self.graceful) = None;
        result
    }

    fn run_accept_loop(&self, graceful_read_fd: RawFd) -> anyhow::Result<()> {
        let (listener_fd, owner_fd) = {
            let endpoint = lock(&self.endpoint);
            let owner = lock(&self.owner_pipe);
            match (endpoint.as_ref(), owner.as_ref()) {
                (Some(endpoint), Some(owner)) => (endpoint.as_raw_fd(), owner.as_raw_fd()),
                _ => anyhow::bail!("handler has already been cleaned up"),
            }
        };
        let monitor = LifecycleMonitor::new(
            signals::signal_pipe_fd(),
            owner_fd,
            graceful_read_fd,
            listener_fd,
            self.options.hard_termination_signal,
            self.options.soft_termination_signal,
        );

        loop {
            self.iterations.fetch_add(1, Relaxed);
            match monitor.wait()? {
                Wake::HardTermination => {
                    info!("hard termination requested, exiting");
                    break;
                }
                Wake::OwnerGone => {
                    info!("owner pipe closed, exiting");
                    break;
                }
                Wake::SoftTermination => {
                    info!("soft termination requested, draining");
                    self.begin_drain();
                }
                Wake::Drain => {
                    debug!("graceful-termination pipe closed, exiting");
                    break;
                }
                Wake::Connection => {
                    let accepted = match lock(&self.endpoint).as_ref() {
                        Some(endpoint) => endpoint.accept(),
                        None => break,
                    };
                    let mut client = match accepted {
                        Ok(client) => client,
                        Err(err) => {
                            error!("accept: {err}");
                            continue;
                        }
                    };
                    if let Err(err) = self.serve_one_request(&mut client) {
                        error!("client: {err:#}");
                    }
                    if signals::take_abort_flag() {
                        error!("client: SIGABRT delivered while the request was being processed");
                    }
                    // close is best-effort; a client that vanished already
                    // is not an error
                    drop(client);
                    self.processed_requests.fetch_add(1, Relaxed);
                    self.enforce_memory_limit();
                }
            }
        }
        Ok(())
    }

    fn serve_one_request(&self, client: &mut UnixStream) -> anyhow::Result<()> {
        let headers = match frame::read_request(client) {
            Ok(Some(headers)) => headers,
            // the client connected and went away again
            Ok(None) => return Ok(()),
            Err(err @ FrameError::HeaderTooLarge(_)) => return Err(err.into()),
            Err(FrameError::Io(err)) => return Err(err).context("request decode"),
        };

        let _watchdog = Watchdog::arm(REQUEST_TIMEOUT, Signal::SIGKILL, request_context(&headers))?;

        let mut body = client
            .try_clone()
            .context("failed to clone the client stream for the body")?;
        self.app
            .handle_request(&headers, &mut body, client)
            .context("application callback")
    }

    fn begin_drain(&self) {
        if let Some(pipe) = lock(&self.graceful).as_mut() {
            pipe.close_write();
        }
        let mut watchdog = lock(&self.drain_watchdog);
        if watchdog.is_none() {
            match Watchdog::arm(DRAIN_TIMEOUT, Signal::SIGKILL, "graceful drain".to_string()) {
                Ok(armed) => *watchdog = Some(armed),
                Err(err) => error!("failed to arm the drain watchdog: {err}"),
            }
        }
    }

    fn enforce_memory_limit(&self) {
        let limit = self.options.memory_limit;
        if limit == 0 {
            return;
        }
        if let Some(usage) = memory_stats::memory_stats() {
            if usage.physical_mem > limit {
                info!(
                    "resident memory {} exceeds the {limit} byte ceiling, draining",
                    usage.physical_mem
                );
                self.begin_drain();
            }
        }
    }

    fn set_state(&self, state: LoopState) {
        *lock(&self.state) = state;
        self.state_cv.notify_all();
    }

    /// Spawns the main loop on a background thread and returns once the loop
    /// is accepting connections (or has already failed and stopped).
    pub fn start_main_loop_thread(self: &Arc<Self>) -> io::Result<()> {
        *lock(&self.state) = LoopState::Idle;
        let handler = Arc::clone(self);
        let thread = thread::Builder::new()
            .name("request-handler".to_string())
            .spawn(move || {
                if let Err(err) = handler.main_loop() {
                    error!("main loop: {err:#}");
                }
            })?;
        *lock(&self.loop_thread) = Some(thread);

        let mut state = lock(&self.state);
        while *state == LoopState::Idle {
            state = self
                .state_cv
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Ok(())
    }

    /// Releases everything the handler owns: wakes and joins the loop thread
    /// if one is running, cancels the drain watchdog, closes the listener
    /// (unlinking the socket file if there is one) and the owner pipe.
    /// Idempotent and callable from any thread.
    pub fn cleanup(&self) {
        if self.cleaned_up.swap(true, SeqCst) {
            return;
        }
        if let Some(pipe) = lock(&self.graceful).as_mut() {
            // wakes the monitor; the loop exits on its next turn
            pipe.close_write();
        }
        if let Some(thread) = lock(&self.loop_thread).take() {
            // never join the loop thread from itself (e.g. a drop at the
            // tail of the loop closure)
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
        *lock(&self.drain_watchdog) = None;
        *lock(&self.endpoint) = None;
        *lock(&self.owner_pipe) = None;
    }
}

impl Drop for RequestHandler {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn request_context(headers: &RequestHeaders) -> String {
    format!(
        "{}{}",
        headers.get_str("SERVER_NAME").unwrap_or_default(),
        headers.get_str("REQUEST_URI").unwrap_or_default()
    )
}
