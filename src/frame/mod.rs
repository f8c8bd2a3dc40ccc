// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(crate) mod tcp;

use std::{
    borrow::Cow,
    error,
    fmt::{self, Display},
};

use crate::bytes::Bytes;

/// A Modbus function code.
///
/// All function codes a slave of this crate is able to decode.
/// Everything else is represented as [`FunctionCode::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 01 (0x01) Read Coils.
    ReadCoils,

    /// 02 (0x02) Read Discrete Inputs
    ReadDiscreteInputs,

    /// 03 (0x03) Read Holding Registers
    ReadHoldingRegisters,

    /// 04 (0x04) Read Input Registers
    ReadInputRegisters,

    /// 05 (0x05) Write Single Coil
    WriteSingleCoil,

    /// 06 (0x06) Write Single Register
    WriteSingleRegister,

    /// 15 (0x0F) Write Multiple Coils
    WriteMultipleCoils,

    /// 16 (0x10) Write Multiple Registers
    WriteMultipleRegisters,

    /// 17 (0x11) Report Slave ID (Serial Line only)
    ReportServerId,

    /// 22 (0x16) Mask Write Register
    MaskWriteRegister,

    /// 23 (0x17) Read/Write Multiple Registers
    ReadWriteMultipleRegisters,

    /// Custom Modbus Function Code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportServerId,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            code => Self::Custom(code),
        }
    }

    /// Gets the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportServerId => 0x11,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::Custom(code) => code,
        }
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items.
///
/// Transmitted using a big-endian representation.
pub type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// A request of a master.
///
/// Multi-item payloads are borrowed while encoding and owned after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// Start address and number of coils.
    ReadCoils(Address, Quantity),
    /// Start address and number of discrete inputs.
    ReadDiscreteInputs(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    /// Start address and the values to write.
    WriteMultipleCoils(Address, Cow<'a, [Coil]>),
    /// Start address and number of input registers.
    ReadInputRegisters(Address, Quantity),
    /// Start address and number of holding registers.
    ReadHoldingRegisters(Address, Quantity),
    WriteSingleRegister(Address, Word),
    /// Start address and the values to write.
    WriteMultipleRegisters(Address, Cow<'a, [Word]>),
    ReportServerId,
    /// Register address, AND mask and OR mask.
    MaskWriteRegister(Address, Word, Word),
    /// Read address, read quantity, write address and the values to write.
    ///
    /// The write is executed before the read.
    ReadWriteMultipleRegisters(Address, Quantity, Address, Cow<'a, [Word]>),
    /// Function code and the undecoded data that follows it.
    Custom(u8, Cow<'a, [u8]>),
}

impl Request<'_> {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Request::*;

        match self {
            ReadCoils(..) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(..) => FunctionCode::ReadDiscreteInputs,
            WriteSingleCoil(..) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(..) => FunctionCode::WriteMultipleCoils,
            ReadInputRegisters(..) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(..) => FunctionCode::ReadHoldingRegisters,
            WriteSingleRegister(..) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(..) => FunctionCode::WriteMultipleRegisters,
            ReportServerId => FunctionCode::ReportServerId,
            MaskWriteRegister(..) => FunctionCode::MaskWriteRegister,
            ReadWriteMultipleRegisters(..) => FunctionCode::ReadWriteMultipleRegisters,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }

    /// The start address and the number of items addressed by the request.
    ///
    /// `None` for requests without a data range, i.e. [`Request::ReportServerId`]
    /// and [`Request::Custom`]. For [`Request::ReadWriteMultipleRegisters`] the
    /// read range is returned.
    #[must_use]
    pub fn range(&self) -> Option<(Address, Quantity)> {
        use Request::*;

        match self {
            ReadCoils(address, quantity)
            | ReadDiscreteInputs(address, quantity)
            | ReadInputRegisters(address, quantity)
            | ReadHoldingRegisters(address, quantity)
            | ReadWriteMultipleRegisters(address, quantity, _, _) => Some((*address, *quantity)),
            WriteSingleCoil(address, _)
            | WriteSingleRegister(address, _)
            | MaskWriteRegister(address, _, _) => Some((*address, 1)),
            WriteMultipleCoils(address, coils) => Some((*address, quantity_of(coils))),
            WriteMultipleRegisters(address, words) => Some((*address, quantity_of(words))),
            ReportServerId | Custom(_, _) => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn quantity_of<T>(items: &[T]) -> Quantity {
    // Decoded requests never carry more than 2000 items.
    debug_assert!(items.len() <= Quantity::MAX.into());
    items.len() as Quantity
}

/// The result of a successfully executed [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Exactly the requested coils, the encoder pads the last byte.
    ReadCoils(Vec<Coil>),
    /// Exactly the requested inputs, the encoder pads the last byte.
    ReadDiscreteInputs(Vec<Coil>),
    /// Echo of the request.
    WriteSingleCoil(Address, Coil),
    /// Start address and number of written coils.
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Vec<Word>),
    ReadHoldingRegisters(Vec<Word>),
    /// Echo of the request.
    WriteSingleRegister(Address, Word),
    /// Start address and number of written registers.
    WriteMultipleRegisters(Address, Quantity),
    /// Server id, run indicator and additional data.
    ReportServerId(u8, bool, Vec<u8>),
    /// Echo of the request.
    MaskWriteRegister(Address, Word, Word),
    /// The registers that have been read after writing.
    ReadWriteMultipleRegisters(Vec<Word>),
    /// Function code and the data that follows it.
    Custom(u8, Bytes),
}

impl Response {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        use Response::*;

        match self {
            ReadCoils(_) => FunctionCode::ReadCoils,
            ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            WriteSingleCoil(..) => FunctionCode::WriteSingleCoil,
            WriteMultipleCoils(..) => FunctionCode::WriteMultipleCoils,
            ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            WriteSingleRegister(..) => FunctionCode::WriteSingleRegister,
            WriteMultipleRegisters(..) => FunctionCode::WriteMultipleRegisters,
            ReportServerId(..) => FunctionCode::ReportServerId,
            MaskWriteRegister(..) => FunctionCode::MaskWriteRegister,
            ReadWriteMultipleRegisters(_) => FunctionCode::ReadWriteMultipleRegisters,
            Custom(code, _) => FunctionCode::Custom(*code),
        }
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ///
    /// Answered for every request that failed while being executed.
    ServerDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    ServerDeviceBusy,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    ///
    /// Answered for requests to unit ids without a slave, unless
    /// missing slaves are ignored.
    GatewayTargetDevice,
    /// Any other code, returned by custom functions.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            ServerDeviceFailure => 0x04,
            Acknowledge => 0x05,
            ServerDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    fn description(self) -> &'static str {
        use crate::frame::ExceptionCode::*;

        match self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

/// A normal or an exception response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu(pub Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

/// A response PDU that might be withheld.
///
/// `None` if the slave must not answer the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalResponsePdu(pub Option<ResponsePdu>);

impl From<Result<Option<Response>, ExceptionResponse>> for OptionalResponsePdu {
    fn from(from: Result<Option<Response>, ExceptionResponse>) -> Self {
        match from {
            Ok(None) => Self(None),
            Ok(Some(response)) => Self(Some(response.into())),
            Err(exception) => Self(Some(exception.into())),
        }
    }
}

impl From<ResponsePdu> for OptionalResponsePdu {
    fn from(from: ResponsePdu) -> Self {
        Self(Some(from))
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl error::Error for ExceptionCode {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}
