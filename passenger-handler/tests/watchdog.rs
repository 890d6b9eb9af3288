// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

//! Watchdog fire/cancel semantics, observed through a benign signal. The
//! tests share one process-global signal handler, so they serialize.

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Mutex;
use std::time::Duration;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use passenger_handler::watchdog::Watchdog;

static FIRED: AtomicBool = AtomicBool::new(false);
static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

extern "C" fn note_fired(_signum: libc::c_int) {
    FIRED.store(true, SeqCst);
}

fn install_probe() {
    let action = SigAction::new(
        SigHandler::Handler(note_fired),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGUSR2, &action) }.unwrap();
    FIRED.store(false, SeqCst);
}

#[test]
fn fires_the_signal_when_the_deadline_passes() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    install_probe();

    let watchdog = Watchdog::arm(
        Duration::from_millis(50),
        Signal::SIGUSR2,
        "example.com/slow".to_string(),
    )
    .unwrap();
    std::thread::sleep(Duration::from_millis(400));
    assert!(FIRED.load(SeqCst), "the watchdog never fired");
    drop(watchdog); // dropping after expiry must be safe
}

#[test]
fn dropping_the_guard_cancels_the_timer() {
    let _guard = SIGNAL_LOCK.lock().unwrap();
    install_probe();

    let watchdog = Watchdog::arm(
        Duration::from_millis(150),
        Signal::SIGUSR2,
        "example.com/fast".to_string(),
    )
    .unwrap();
    drop(watchdog);
    std::thread::sleep(Duration::from_millis(400));
    assert!(!FIRED.load(SeqCst), "a cancelled watchdog fired anyway");
}
