// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Routing of requests to the addressed slaves.

use std::sync::{Arc, Mutex};

use log::{debug, log_enabled, warn, Level};

use crate::{
    register::{self, Inspection},
    store::{self, ServerContext, SlaveContext},
    Error, ExceptionCode, ExceptionResponse, FunctionCode, Header, Request, RequestAdu,
    RequestFrame, Response, ResponseAdu, ResponsePdu, UnitId, BROADCAST_UNIT_ID,
};

use super::{execute, ExecuteError, FunctionRegistry};

/// How a request is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Executed on every slave without responding.
    Broadcast,

    /// Executed on a single slave.
    Unicast(UnitId),
}

impl Dispatch {
    /// Requests for unit `0` are broadcasts if the context enables them.
    #[must_use]
    pub fn of(context: &ServerContext, hdr: Header) -> Self {
        if context.is_broadcast_enabled() && hdr.unit_id == BROADCAST_UNIT_ID {
            Self::Broadcast
        } else {
            Self::Unicast(hdr.unit_id)
        }
    }
}

/// Executes requests against a [`ServerContext`] and maps failures onto
/// exception responses.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    context: Arc<ServerContext>,
    functions: Arc<FunctionRegistry>,
    inspection: Inspection,
}

impl RequestDispatcher {
    #[must_use]
    pub fn new(context: Arc<ServerContext>, functions: Arc<FunctionRegistry>) -> Self {
        Self {
            context,
            functions,
            inspection: Inspection::default(),
        }
    }

    /// Select the holding registers that are logged after each request.
    #[must_use]
    pub fn inspection(mut self, inspection: Inspection) -> Self {
        self.inspection = inspection;
        self
    }

    #[must_use]
    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Executes a decoded request or rejects an invalid one.
    #[must_use]
    pub fn dispatch(&self, frame: &RequestFrame<'_>) -> Option<ResponseAdu> {
        match frame {
            RequestFrame::Request(adu) => self.execute(adu),
            RequestFrame::Invalid(hdr, function) => self.reject(*hdr, *function),
        }
    }

    /// Executes a request.
    ///
    /// Returns `None` if nothing must be sent back, i.e. for broadcasts and
    /// for requests that address a missing slave while those are ignored.
    /// Otherwise the response carries the header of the request.
    #[must_use]
    pub fn execute(&self, adu: &RequestAdu<'_>) -> Option<ResponseAdu> {
        let RequestAdu { hdr, request } = adu;
        let unit_id = match Dispatch::of(&self.context, *hdr) {
            Dispatch::Broadcast => {
                self.broadcast(request);
                return None;
            }
            Dispatch::Unicast(unit_id) => unit_id,
        };
        let function = request.function_code();
        let result = match self.context.slave(unit_id) {
            Ok(slave) => self.unicast(slave, unit_id, request).map_err(|err| {
                match &err {
                    ExecuteError::Exception(code) => {
                        debug!("Rejecting {function} on unit {unit_id}: {code}");
                    }
                    ExecuteError::Failure(err) => {
                        warn!("Failed to execute {function} on unit {unit_id}: {err}");
                    }
                }
                ExceptionResponse {
                    function,
                    exception: err.exception_code(),
                }
            }),
            Err(err) => Err(ExceptionResponse {
                function,
                exception: self.missing_slave(&err)?,
            }),
        };
        Some(ResponseAdu::new(*hdr, result))
    }

    /// Answers a request whose data doesn't match its function code with
    /// [`ExceptionCode::IllegalDataValue`] without touching the datastore.
    ///
    /// Broadcasts and missing slaves are handled as in
    /// [`execute()`](Self::execute).
    #[must_use]
    pub fn reject(&self, hdr: Header, function: FunctionCode) -> Option<ResponseAdu> {
        let exception = match Dispatch::of(&self.context, hdr) {
            Dispatch::Broadcast => {
                debug!("Dropping invalid broadcast of {function}");
                return None;
            }
            Dispatch::Unicast(unit_id) => match self.context.slave(unit_id) {
                Ok(_) => {
                    debug!("Rejecting invalid {function} on unit {unit_id}");
                    ExceptionCode::IllegalDataValue
                }
                Err(err) => self.missing_slave(&err)?,
            },
        };
        Some(ResponseAdu::new(
            hdr,
            ResponsePdu::from(ExceptionResponse {
                function,
                exception,
            }),
        ))
    }

    /// The exception for a request to a missing slave, `None` if it is
    /// ignored.
    fn missing_slave(&self, err: &Error) -> Option<ExceptionCode> {
        if self.context.ignores_missing_slaves() {
            debug!("Ignoring request: {err}");
            return None;
        }
        debug!("Rejecting request: {err}");
        Some(ExceptionCode::GatewayTargetDevice)
    }

    fn broadcast(&self, request: &Request<'_>) {
        let function = request.function_code();
        for unit_id in self.context.unit_ids() {
            let result = self
                .context
                .lock(unit_id)
                .map_err(ExecuteError::from)
                .and_then(|mut slave| execute(&mut slave, unit_id, request, &self.functions));
            if let Err(err) = result {
                warn!("Failed to broadcast {function} to unit {unit_id}: {err}");
            }
        }
    }

    /// Executes and inspects the request while holding the lock of the slave.
    fn unicast(
        &self,
        slave: &Mutex<SlaveContext>,
        unit_id: UnitId,
        request: &Request<'_>,
    ) -> Result<Option<Response>, ExecuteError> {
        let mut slave = store::lock_slave(slave);
        let response = execute(&mut slave, unit_id, request, &self.functions)?;
        if log_enabled!(Level::Debug) {
            if let Some(words) = self.inspection_words(&slave, request) {
                debug!(
                    "Holding registers of unit {unit_id} after {}: {words:?}",
                    request.function_code()
                );
            }
        }
        Ok(response)
    }

    /// The binary strings of the holding registers that are inspected after
    /// `request`, `None` if the request has no register range or inspection
    /// is disabled.
    pub(crate) fn inspection_words(
        &self,
        slave: &SlaveContext,
        request: &Request<'_>,
    ) -> Option<Vec<String>> {
        if self.inspection == Inspection::Disabled {
            return None;
        }
        let (address, count) = request.range()?;
        Some(register::inspect_words(
            slave.holding_registers(),
            self.inspection,
            address,
            count,
        ))
    }
}
