// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// Deadline bookkeeping for code that sleeps in slices and must not oversleep
/// the deadline as a whole, such as the watchdog timer thread.
pub struct TimeoutManager {
    start_time: Instant,
    timeout: Duration,
}

impl TimeoutManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            timeout,
        }
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start_time.elapsed())
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expired(&self) -> bool {
        self.start_time.elapsed() >= self.timeout
    }
}

impl std::fmt::Debug for TimeoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutManager")
            .field("elapsed", &self.elapsed())
            .field("timeout", &self.timeout)
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_deadline_is_not_expired() {
        let manager = TimeoutManager::new(Duration::from_secs(5));
        assert!(!manager.expired());
        assert!(manager.remaining() <= Duration::from_secs(5));
        assert!(manager.remaining() > Duration::from_secs(4));
    }

    #[test]
    fn zero_deadline_expires_immediately() {
        let manager = TimeoutManager::new(Duration::ZERO);
        assert!(manager.expired());
        assert_eq!(Duration::ZERO, manager.remaining());
    }

    #[test]
    fn remaining_shrinks_over_time() {
        let manager = TimeoutManager::new(Duration::from_secs(60));
        let first = manager.remaining();
        std::thread::sleep(Duration::from_millis(10));
        assert!(manager.remaining() < first);
    }
}
