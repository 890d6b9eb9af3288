// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod endpoint;
pub mod frame;
pub mod platform;

pub use endpoint::{connect, ListenEndpoint, SocketKind, UNIX_PATH_MAX};
pub use frame::{read_request, write_request, FrameError, RequestHeaders, MAX_HEADER_SIZE};
pub use platform::BACKLOG_SIZE;
