// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Standalone request handler.
//!
//! The spawning process hands over the read end of its owner pipe on stdin
//! and reads the socket name back from stdout. The handler then serves a
//! minimal status application until the parent disappears or a termination
//! signal arrives.

use std::io::{Read, Write};
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use passenger_handler::constants::passenger_header;
use passenger_handler::{Application, HandlerOptions, RequestHandler, RequestHeaders};

struct StatusApplication;

impl Application for StatusApplication {
    fn handle_request(
        &self,
        _headers: &RequestHeaders,
        _body: &mut dyn Read,
        client: &mut dyn Write,
    ) -> anyhow::Result<()> {
        let body = "ok";
        write!(
            client,
            "HTTP/1.1 200 OK\r\nX-Powered-By: {}\r\nContent-Length: {}\r\n\r\n{}",
            passenger_header(),
            body.len(),
            body
        )?;
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // stdin is the owner pipe, inherited from the spawning process
    let owner_pipe = unsafe { OwnedFd::from_raw_fd(0) };

    let handler = RequestHandler::new(owner_pipe, Arc::new(StatusApplication), HandlerOptions::default())?;
    println!("{}", handler.socket_name());
    std::io::stdout().flush()?;

    handler.main_loop()?;
    handler.cleanup();
    Ok(())
}
