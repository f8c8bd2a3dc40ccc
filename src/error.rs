// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use thiserror::Error;

use crate::{Address, Quantity, UnitId};

/// Errors of the datastore, the register conversions and the server
/// bring-up.
#[derive(Debug, Error)]
pub enum Error {
    /// No slave is registered for the requested unit id.
    #[error("no such slave: {0}")]
    NoSuchSlave(UnitId),

    /// The range is not covered by the register bank.
    #[error("address out of range: {quantity} item(s) starting at {address}")]
    AddressOutOfRange { address: Address, quantity: Quantity },

    /// The value does not fit into a 16-bit register.
    #[error("invalid register value: {0}")]
    InvalidRegisterValue(i64),

    /// The same unit id has been configured more than once.
    #[error("duplicate unit id: {0}")]
    DuplicateUnitId(UnitId),

    /// The function code is reserved for exception responses.
    #[error("invalid function code: 0x{0:02X}")]
    InvalidFunctionCode(u8),

    /// The handler of a custom function panicked.
    #[error("custom function 0x{0:02X} panicked")]
    FunctionPanicked(u8),
}
