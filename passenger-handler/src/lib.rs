// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The per-worker request handler.
//!
//! A handler is a single-tenant, single-threaded server: it owns one
//! application instance and one private Unix socket, decodes one framed
//! request per accepted connection, hands it to the application, and streams
//! the response back. It exits on a hard termination signal, finishes the
//! in-flight request first on a soft one, and treats EOF on the inherited
//! owner pipe as "the web server is gone".

pub mod app;
pub mod config;
pub mod constants;
pub mod handler;
pub mod monitor;
pub mod signals;
pub mod watchdog;

pub use app::{Application, FnApplication};
pub use handler::{HandlerOptions, RequestHandler};
pub use passenger_ipc::frame::RequestHeaders;
