// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PollError {
    #[error("poll failed with errno: {0}")]
    Poll(i32),
}
