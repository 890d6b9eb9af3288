// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};

use passenger_ipc::frame::RequestHeaders;

/// The contract between the request handler and the hosted application.
///
/// The handler delivers the decoded request metadata, the connection
/// positioned at the first body byte, and a writer for the response. The
/// implementation writes a complete response to `client` and returns; the
/// handler closes the connection afterwards, which is why `client` is only a
/// `Write`. The body is a forward-only stream: frameworks probing for
/// rewindable input must fall back to streaming reads.
///
/// An error return is logged and the connection is abandoned; it never takes
/// the handler down.
pub trait Application: Send + Sync {
    fn handle_request(
        &self,
        headers: &RequestHeaders,
        body: &mut dyn Read,
        client: &mut dyn Write,
    ) -> anyhow::Result<()>;
}

/// Adapter turning a closure into an [`Application`].
pub struct FnApplication<F>(pub F);

impl<F> Application for FnApplication<F>
where
    F: Fn(&RequestHeaders, &mut dyn Read, &mut dyn Write) -> anyhow::Result<()> + Send + Sync,
{
    fn handle_request(
        &self,
        headers: &RequestHeaders,
        body: &mut dyn Read,
        client: &mut dyn Write,
    ) -> anyhow::Result<()> {
        (self.0)(headers, body, client)
    }
}
