// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [Modbus](https://en.wikipedia.org/wiki/Modbus) TCP slave
//! based on [tokio](https://tokio.rs).
//!
//! The slave answers requests of one or more masters against a set of
//! per-unit register datastores. Every accepted connection is served by
//! its own task that receives bytes, lets a [`codec::Framer`] delimit the
//! contained requests, executes them with a [`server::RequestDispatcher`]
//! and writes the encoded responses back.
//!
//! Requests addressed to unit `0` are treated as broadcasts if enabled:
//! they are executed on every unit and never answered.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::{net::SocketAddr, sync::Arc, time::Duration};
//!
//! use tokio_modbus_slave::{
//!     server::tcp::{bind_listener, Server},
//!     store::{ServerContext, SlaveContext, RegisterBank},
//! };
//!
//! # async fn run() -> std::io::Result<()> {
//! let slave = SlaveContext::new().with_holding_registers(RegisterBank::with_len(0, 124));
//! let context = ServerContext::multi([(2, slave)]).expect("unique unit ids");
//!
//! let socket_addr: SocketAddr = "127.0.0.1:5502".parse().unwrap();
//! let server = Server::new(bind_listener(socket_addr)?, Arc::new(context))
//!     .read_timeout(Some(Duration::from_secs(1)));
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![warn(clippy::pedantic)]
// Additional restrictions
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::self_named_module_files)]
// Exceptions
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::wildcard_imports)]

pub mod prelude;

pub mod codec;
pub mod register;
pub mod server;
pub mod store;

mod error;
pub use self::error::Error;

mod frame;
pub use self::frame::{
    tcp::{
        Header, RequestAdu, RequestFrame, ResponseAdu, TransactionId, UnitId,
        BROADCAST_UNIT_ID, TCP_DEVICE_UNIT_ID,
    },
    Address, Coil, ExceptionCode, ExceptionResponse, FunctionCode, OptionalResponsePdu, Quantity,
    Request, Response, ResponsePdu, Word,
};

/// Specialized [`std::result::Result`] type for datastore and
/// conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Re-export the `bytes` crate
///
/// Needed to prevent version conflicts with types that are exposed by the public API.
pub use bytes;
