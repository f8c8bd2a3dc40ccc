// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP slave skeleton

mod connection;
pub use self::connection::{Connection, RECV_BUFFER_SIZE};

mod dispatch;
pub use self::dispatch::{Dispatch, RequestDispatcher};

mod execute;
pub use self::execute::execute;

mod function;
pub use self::function::{CustomFunction, FunctionRegistry};

mod registry;
pub use self::registry::{ConnectionId, ConnectionInfo, ConnectionRegistry, Registration};

pub mod tcp;

use crate::{Error, ExceptionCode};

/// Cause for termination of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    /// The server has finished processing.
    Finished,

    /// The server has been aborted.
    Aborted,
}

/// Failure while executing a request.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The request is rejected with an exception response.
    #[error(transparent)]
    Exception(#[from] ExceptionCode),

    /// The slave failed to execute the request.
    #[error(transparent)]
    Failure(#[from] Error),
}

impl ExecuteError {
    /// The exception code that is sent back to the master.
    ///
    /// All failures are reported as [`ExceptionCode::ServerDeviceFailure`].
    #[must_use]
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            Self::Exception(code) => *code,
            Self::Failure(_) => ExceptionCode::ServerDeviceFailure,
        }
    }
}
