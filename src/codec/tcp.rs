// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP framing based on the MBAP header.

use std::{
    io::{self, Error, ErrorKind},
    sync::Arc,
};

use byteorder::{BigEndian, ByteOrder as _};
use log::{debug, trace};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bytes::{BufMut as _, Bytes, BytesMut},
    frame::tcp::{
        Header, RequestFrame, ResponseAdu, UnitId, BROADCAST_UNIT_ID, TCP_DEVICE_UNIT_ID,
    },
    server::FunctionRegistry,
    OptionalResponsePdu, ResponsePdu,
};

use super::{
    decode_request_frame, encode_response_result_pdu, response_result_pdu_size, u16_len, Framer,
};

const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

/// Splits a byte stream into MBAP frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct AduDecoder;

impl Decoder for AduDecoder {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<(Header, Bytes)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        debug_assert!(buf.len() >= 4);
        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        if len == 0 {
            return Err(Error::new(ErrorKind::InvalidData, "Invalid length field"));
        }
        let pdu_len = len - 1;
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);

        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            // Discard the frame, the stream can't be resynchronized.
            buf.clear();
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid protocol identifier: 0x{protocol_id:04X}"),
            ));
        }

        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];
        let hdr = Header {
            transaction_id,
            unit_id,
        };

        let data = buf.split_to(pdu_len).freeze();

        Ok(Some((hdr, data)))
    }
}

/// Decodes requests and encodes responses of a Modbus TCP slave.
#[derive(Debug, Default)]
pub struct ServerCodec {
    decoder: AduDecoder,
    functions: Arc<FunctionRegistry>,
}

impl ServerCodec {
    /// A codec that decodes the function codes of `functions`
    /// as custom requests.
    #[must_use]
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self {
            decoder: AduDecoder,
            functions,
        }
    }
}

impl Decoder for ServerCodec {
    type Item = RequestFrame<'static>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<RequestFrame<'static>>> {
        let Some((hdr, pdu_data)) = self.decoder.decode(buf)? else {
            return Ok(None);
        };
        decode_request_frame(hdr, pdu_data, &self.functions).map(Some)
    }
}

impl Encoder<&ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: &ResponseAdu, buf: &mut BytesMut) -> io::Result<()> {
        let ResponseAdu {
            hdr,
            pdu: OptionalResponsePdu(Some(pdu)),
        } = adu
        else {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "no response to encode",
            ));
        };
        let ResponsePdu(res) = pdu;
        let pdu_len = response_result_pdu_size(res)?;
        buf.reserve(pdu_len + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16_len(pdu_len + 1));
        buf.put_u8(hdr.unit_id);
        encode_response_result_pdu(buf, res);
        Ok(())
    }
}

/// Whether a frame for `unit_id` is accepted by a slave that serves `units`.
fn accepts_unit(unit_id: UnitId, units: &[UnitId], single: bool) -> bool {
    single
        || units.contains(&unit_id)
        || units.contains(&BROADCAST_UNIT_ID)
        || units.contains(&TCP_DEVICE_UNIT_ID)
}

/// The [`Framer`] of Modbus TCP connections.
#[derive(Debug, Default)]
pub struct TcpFramer {
    buf: BytesMut,
    codec: ServerCodec,
    unit_filter: bool,
}

impl TcpFramer {
    #[must_use]
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self {
            buf: BytesMut::new(),
            codec: ServerCodec::new(functions),
            unit_filter: false,
        }
    }

    /// Drop requests for unit ids that are not served.
    ///
    /// Filtering is skipped in single mode and if the served units contain
    /// the broadcast unit id `0` or the TCP device unit id `0xFF`. A dropped
    /// request discards all buffered input. Disabled by default, i.e. missing
    /// units are handled by the dispatcher.
    #[must_use]
    pub fn unit_filter(mut self, unit_filter: bool) -> Self {
        self.unit_filter = unit_filter;
        self
    }

    /// The number of buffered bytes that don't form a complete frame yet.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

impl Framer for TcpFramer {
    fn process_incoming_packet(
        &mut self,
        data: &[u8],
        units: &[UnitId],
        single: bool,
        on_request: &mut dyn FnMut(RequestFrame<'static>),
    ) -> io::Result<()> {
        self.buf.extend_from_slice(data);
        while let Some(frame) = self.codec.decode(&mut self.buf)? {
            let unit_id = frame.hdr().unit_id;
            if self.unit_filter && !accepts_unit(unit_id, units, single) {
                debug!("Dropping request for unknown unit {unit_id}");
                self.reset_frame();
                break;
            }
            trace!("Decoded request: {frame:?}");
            on_request(frame);
        }
        Ok(())
    }

    fn build_packet(&mut self, response: &ResponseAdu) -> io::Result<Bytes> {
        let mut buf = BytesMut::new();
        self.codec.encode(response, &mut buf)?;
        Ok(buf.freeze())
    }

    fn reset_frame(&mut self) {
        self.buf.clear();
    }
}
