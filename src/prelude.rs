// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types and traits

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
pub use crate::server;

#[allow(missing_docs)]
pub mod tcp {
    pub use crate::codec::tcp::TcpFramer;
    pub use crate::server::tcp::*;
}

///////////////////////////////////////////////////////////////////
/// Types
///////////////////////////////////////////////////////////////////
pub use crate::register::Inspection;
pub use crate::server::{
    ConnectionRegistry, ExecuteError, FunctionRegistry, RequestDispatcher, Terminated,
};
pub use crate::store::{RegisterBank, ServerContext, SlaveContext};
pub use crate::{ExceptionCode, Request, RequestFrame, Response, UnitId};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::codec::Framer;
pub use crate::server::CustomFunction;
