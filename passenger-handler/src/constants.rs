// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

pub use passenger_ipc::frame::MAX_HEADER_SIZE;
pub use passenger_ipc::platform::BACKLOG_SIZE;

/// Ceiling on the time a single request may spend inside the application.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Ceiling on the graceful-drain phase once termination has been requested.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix for handler socket files under `/tmp`.
pub const SOCKET_NAME_PREFIX: &str = "passenger";

const ENTERPRISE_MARKER_FILE: &str = "enterprisey.txt";

const PASSENGER_HEADER_BASE: &str = const_format::concatcp!(
    "Phusion Passenger (mod_rails/mod_rack) ",
    env!("CARGO_PKG_VERSION")
);

static PASSENGER_HEADER: LazyLock<String> = LazyLock::new(|| {
    if Path::new(ENTERPRISE_MARKER_FILE).exists() {
        format!("{PASSENGER_HEADER_BASE}, Enterprise Edition")
    } else {
        PASSENGER_HEADER_BASE.to_string()
    }
});

/// Identification string applications may emit in an `X-Powered-By`
/// response header.
pub fn passenger_header() -> &'static str {
    &PASSENGER_HEADER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_header_carries_the_crate_version() {
        assert!(passenger_header().starts_with("Phusion Passenger (mod_rails/mod_rack) "));
        assert!(passenger_header().contains(env!("CARGO_PKG_VERSION")));
    }
}
