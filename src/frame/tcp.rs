// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::*;

/// Correlates a response with its request.
pub type TransactionId = u16;

/// Selects one of the slaves behind a TCP endpoint.
pub type UnitId = u8;

/// Addresses all slaves at once, never answered.
pub const BROADCAST_UNIT_ID: UnitId = 0;

/// Addresses the TCP endpoint itself if it is not a gateway.
pub const TCP_DEVICE_UNIT_ID: UnitId = 0xFF;

/// The fields of the MBAP header that are echoed in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transaction_id: TransactionId,
    pub unit_id: UnitId,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu<'a> {
    pub hdr: Header,
    pub request: Request<'a>,
}

impl<'a> RequestAdu<'a> {
    #[must_use]
    pub fn new(hdr: Header, request: Request<'a>) -> Self {
        Self { hdr, request }
    }
}

/// A delimited request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame<'a> {
    /// A decoded request.
    Request(RequestAdu<'a>),

    /// The data of the request does not match its function code.
    Invalid(Header, FunctionCode),
}

impl RequestFrame<'_> {
    #[must_use]
    pub fn hdr(&self) -> Header {
        match self {
            Self::Request(adu) => adu.hdr,
            Self::Invalid(hdr, _) => *hdr,
        }
    }
}

/// The result of executing a [`RequestAdu`].
///
/// The header mirrors the header of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub hdr: Header,
    pub pdu: OptionalResponsePdu,
}

impl ResponseAdu {
    #[must_use]
    pub fn new(hdr: Header, pdu: impl Into<OptionalResponsePdu>) -> Self {
        Self {
            hdr,
            pdu: pdu.into(),
        }
    }

    /// `false` if nothing must be sent back to the master.
    #[must_use]
    pub fn should_respond(&self) -> bool {
        self.pdu.0.is_some()
    }

    /// The exception code if the request failed.
    #[must_use]
    pub fn exception(&self) -> Option<ExceptionCode> {
        match &self.pdu.0 {
            Some(ResponsePdu(Err(rsp))) => Some(rsp.exception),
            _ => None,
        }
    }

    /// The response if the request succeeded.
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match &self.pdu.0 {
            Some(ResponsePdu(Ok(rsp))) => Some(rsp),
            _ => None,
        }
    }
}
