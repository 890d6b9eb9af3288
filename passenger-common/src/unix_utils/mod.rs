// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

mod errors;
mod pipe;
mod poll;

pub use errors::PollError;
pub use pipe::Pipe;
pub use poll::wait_readable;
