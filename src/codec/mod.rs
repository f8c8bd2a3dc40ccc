// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encoding and decoding of Modbus messages.

use std::io::{self, Cursor, Error, ErrorKind, Read as _};

use byteorder::{BigEndian, ReadBytesExt as _};
use log::debug;

use crate::{
    bytes::{Buf as _, BufMut as _, Bytes, BytesMut},
    server::FunctionRegistry,
    Coil, ExceptionResponse, FunctionCode, Header, Quantity, Request, RequestAdu, RequestFrame,
    Response, ResponseAdu, UnitId, Word,
};

pub mod tcp;

/// Maximum size of a request or response PDU.
const MAX_PDU_SIZE: usize = 253;

/// Delimits requests in a byte stream and encodes responses.
///
/// Every connection owns a framer of its own, because partially received
/// requests are buffered between two calls of
/// [`process_incoming_packet()`](Self::process_incoming_packet).
pub trait Framer {
    /// Appends `data` to the buffered input and passes every complete
    /// request frame to `on_request`, in the order of arrival.
    ///
    /// Fails if the input can't be answered at all, e.g. because the
    /// framing is broken.
    ///
    /// `units` are the unit ids served by the slave and `single` is set if
    /// every unit id is served. A framer may use them to discard requests
    /// early.
    fn process_incoming_packet(
        &mut self,
        data: &[u8],
        units: &[UnitId],
        single: bool,
        on_request: &mut dyn FnMut(RequestFrame<'static>),
    ) -> io::Result<()>;

    /// Encodes a response for the wire.
    fn build_packet(&mut self, response: &ResponseAdu) -> io::Result<Bytes>;

    /// Discards all buffered input.
    fn reset_frame(&mut self);
}

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // Lengths are bounded by MAX_PDU_SIZE.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    // Lengths are bounded by MAX_PDU_SIZE.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

fn invalid_data(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidData, msg.into())
}

fn put_words(buf: &mut BytesMut, words: &[Word]) {
    buf.put_u8(u8_len(words.len() * 2));
    for word in words {
        buf.put_u16(*word);
    }
}

fn put_packed_coils(buf: &mut BytesMut, coils: &[Coil]) {
    let len = packed_coils_size(coils);
    buf.put_u8(u8_len(len));
    let offset = buf.len();
    buf.resize(offset + len, 0);
    for (i, coil) in coils.iter().enumerate() {
        buf[offset + i / 8] |= u8::from(*coil) << (i % 8);
    }
}

fn encode_response_pdu(buf: &mut BytesMut, rsp: &Response) {
    use crate::frame::Response::*;
    buf.put_u8(rsp.function_code().value());
    match rsp {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => put_packed_coils(buf, coils),
        ReadInputRegisters(words)
        | ReadHoldingRegisters(words)
        | ReadWriteMultipleRegisters(words) => put_words(buf, words),
        WriteSingleCoil(address, state) => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*state));
        }
        WriteSingleRegister(address, value)
        | WriteMultipleCoils(address, value)
        | WriteMultipleRegisters(address, value) => {
            buf.put_u16(*address);
            buf.put_u16(*value);
        }
        ReportServerId(server_id, running, data) => {
            buf.put_u8(u8_len(2 + data.len()));
            buf.put_u8(*server_id);
            buf.put_u8(if *running { 0xFF } else { 0x00 });
            buf.put_slice(data);
        }
        MaskWriteRegister(address, and_mask, or_mask) => {
            buf.put_u16(*address);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
        Custom(_, data) => buf.put_slice(data),
    }
}

fn encode_exception_response_pdu(buf: &mut BytesMut, rsp: ExceptionResponse) {
    let function = rsp.function.value();
    debug_assert!(function < 0x80);
    buf.put_u8(function | 0x80);
    buf.put_u8(rsp.exception.into());
}

fn encode_response_result_pdu(buf: &mut BytesMut, res: &Result<Response, ExceptionResponse>) {
    match res {
        Ok(rsp) => encode_response_pdu(buf, rsp),
        Err(rsp) => encode_exception_response_pdu(buf, *rsp),
    }
}

fn read_u16_be(reader: &mut impl io::Read) -> io::Result<u16> {
    reader.read_u16::<BigEndian>()
}

fn read_words(rdr: &mut Cursor<&Bytes>, quantity: Quantity) -> io::Result<Vec<Word>> {
    let byte_count = rdr.read_u8()?;
    if u32::from(byte_count) != u32::from(quantity) * 2 {
        return Err(invalid_data(format!(
            "byte count {byte_count} does not match quantity {quantity}"
        )));
    }
    (0..quantity).map(|_| read_u16_be(rdr)).collect()
}

fn read_packed_coils(rdr: &mut Cursor<&Bytes>, quantity: Quantity) -> io::Result<Vec<Coil>> {
    let byte_count = usize::from(rdr.read_u8()?);
    if byte_count != packed_coils_len(quantity) {
        return Err(invalid_data(format!(
            "byte count {byte_count} does not match quantity {quantity}"
        )));
    }
    let mut packed = vec![0; byte_count];
    rdr.read_exact(&mut packed)?;
    Ok((0..usize::from(quantity))
        .map(|i| (packed[i / 8] >> (i % 8)) & 0b1 > 0)
        .collect())
}

impl TryFrom<Bytes> for Request<'static> {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Request::*;
        if bytes.len() > MAX_PDU_SIZE {
            return Err(invalid_data("request PDU size exceeded"));
        }
        let rdr = &mut Cursor::new(&bytes);
        let req = match FunctionCode::new(rdr.read_u8()?) {
            FunctionCode::ReadCoils => ReadCoils(read_u16_be(rdr)?, read_u16_be(rdr)?),
            FunctionCode::ReadDiscreteInputs => {
                ReadDiscreteInputs(read_u16_be(rdr)?, read_u16_be(rdr)?)
            }
            FunctionCode::ReadHoldingRegisters => {
                ReadHoldingRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?)
            }
            FunctionCode::ReadInputRegisters => {
                ReadInputRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?)
            }
            FunctionCode::WriteSingleCoil => {
                WriteSingleCoil(read_u16_be(rdr)?, coil_to_bool(read_u16_be(rdr)?)?)
            }
            FunctionCode::WriteSingleRegister => {
                WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?)
            }
            FunctionCode::WriteMultipleCoils => {
                let address = read_u16_be(rdr)?;
                let quantity = read_u16_be(rdr)?;
                WriteMultipleCoils(address, read_packed_coils(rdr, quantity)?.into())
            }
            FunctionCode::WriteMultipleRegisters => {
                let address = read_u16_be(rdr)?;
                let quantity = read_u16_be(rdr)?;
                WriteMultipleRegisters(address, read_words(rdr, quantity)?.into())
            }
            FunctionCode::ReportServerId => ReportServerId,
            FunctionCode::MaskWriteRegister => {
                MaskWriteRegister(read_u16_be(rdr)?, read_u16_be(rdr)?, read_u16_be(rdr)?)
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                let read_address = read_u16_be(rdr)?;
                let read_quantity = read_u16_be(rdr)?;
                let write_address = read_u16_be(rdr)?;
                let write_quantity = read_u16_be(rdr)?;
                let words = read_words(rdr, write_quantity)?;
                ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words.into())
            }
            FunctionCode::Custom(code) if code < 0x80 => {
                return Ok(Custom(code, bytes[1..].to_vec().into()));
            }
            FunctionCode::Custom(code) => {
                return Err(invalid_data(format!("invalid function code: 0x{code:02X}")));
            }
        };
        if rdr.has_remaining() {
            return Err(invalid_data("undecoded request data"));
        }
        Ok(req)
    }
}

/// Decodes a request PDU.
///
/// Function codes of registered custom functions are always decoded as
/// [`Request::Custom`], even if they collide with a standard function code.
fn decode_request_pdu(
    bytes: Bytes,
    functions: &FunctionRegistry,
) -> io::Result<Request<'static>> {
    let fn_code = Cursor::new(&bytes).read_u8()?;
    if !functions.contains(fn_code) {
        return Request::try_from(bytes);
    }
    if bytes.len() > MAX_PDU_SIZE {
        return Err(invalid_data("request PDU size exceeded"));
    }
    Ok(Request::Custom(fn_code, bytes[1..].to_vec().into()))
}

/// The function code of a request PDU that can be answered.
fn request_function_code(bytes: &Bytes) -> io::Result<FunctionCode> {
    if bytes.len() > MAX_PDU_SIZE {
        return Err(invalid_data("request PDU size exceeded"));
    }
    let code = Cursor::new(bytes).read_u8()?;
    if code >= 0x80 {
        return Err(invalid_data(format!("invalid function code: 0x{code:02X}")));
    }
    Ok(FunctionCode::new(code))
}

/// Decodes the PDU of a delimited request frame.
///
/// Fails for empty or oversized PDUs and for function codes of exception
/// responses. A request whose data doesn't match its function code is
/// returned as [`RequestFrame::Invalid`].
pub(crate) fn decode_request_frame(
    hdr: Header,
    bytes: Bytes,
    functions: &FunctionRegistry,
) -> io::Result<RequestFrame<'static>> {
    let function = request_function_code(&bytes)?;
    match decode_request_pdu(bytes, functions) {
        Ok(request) => Ok(RequestFrame::Request(RequestAdu { hdr, request })),
        Err(err) => {
            debug!("Invalid {function} request: {err}");
            Ok(RequestFrame::Invalid(hdr, function))
        }
    }
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> io::Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(invalid_data(format!("Invalid coil value: 0x{coil:04X}"))),
    }
}

fn packed_coils_size(coils: &[Coil]) -> usize {
    coils.len().div_ceil(8)
}

fn packed_coils_len(quantity: Quantity) -> usize {
    usize::from(quantity).div_ceil(8)
}

fn response_pdu_size(rsp: &Response) -> io::Result<usize> {
    use crate::frame::Response::*;
    let size = 1 + match rsp {
        ReadCoils(coils) | ReadDiscreteInputs(coils) => 1 + packed_coils_size(coils),
        ReadInputRegisters(words)
        | ReadHoldingRegisters(words)
        | ReadWriteMultipleRegisters(words) => 1 + words.len() * 2,
        WriteSingleCoil(_, _)
        | WriteSingleRegister(_, _)
        | WriteMultipleCoils(_, _)
        | WriteMultipleRegisters(_, _) => 4,
        ReportServerId(_, _, data) => 3 + data.len(),
        MaskWriteRegister(_, _, _) => 6,
        Custom(_, data) => data.len(),
    };
    if size > MAX_PDU_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "response PDU size exceeded",
        ));
    }
    Ok(size)
}

fn response_result_pdu_size(res: &Result<Response, ExceptionResponse>) -> io::Result<usize> {
    match res {
        Ok(rsp) => response_pdu_size(rsp),
        Err(_) => Ok(2),
    }
}
