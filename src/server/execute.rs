// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution of requests against the datastore of a slave.

use std::panic::{self, AssertUnwindSafe};

use crate::{
    store::{RegisterBank, SlaveContext},
    Address, Error, ExceptionCode, Quantity, Request, Response, UnitId,
};

use super::{ExecuteError, FunctionRegistry};

const MAX_READ_BITS: Quantity = 2000;
const MAX_READ_WORDS: Quantity = 125;
const MAX_WRITE_BITS: Quantity = 1968;
const MAX_WRITE_WORDS: Quantity = 123;
const MAX_READ_WRITE_WORDS: Quantity = 121;

fn check_quantity(quantity: usize, max: Quantity) -> Result<Quantity, ExceptionCode> {
    match Quantity::try_from(quantity) {
        Ok(quantity) if (1..=max).contains(&quantity) => Ok(quantity),
        _ => Err(ExceptionCode::IllegalDataValue),
    }
}

fn check_range<T>(
    bank: &RegisterBank<T>,
    address: Address,
    quantity: Quantity,
) -> Result<(), ExceptionCode>
where
    T: Copy + Default,
{
    if bank.validate(address, quantity) {
        Ok(())
    } else {
        Err(ExceptionCode::IllegalDataAddress)
    }
}

fn read<T>(
    bank: &RegisterBank<T>,
    address: Address,
    quantity: Quantity,
    max: Quantity,
) -> Result<Vec<T>, ExecuteError>
where
    T: Copy + Default,
{
    let quantity = check_quantity(quantity.into(), max)?;
    check_range(bank, address, quantity)?;
    Ok(bank.read(address, quantity)?)
}

fn write<T>(
    bank: &mut RegisterBank<T>,
    address: Address,
    values: &[T],
    max: Quantity,
) -> Result<Quantity, ExecuteError>
where
    T: Copy + Default,
{
    let quantity = check_quantity(values.len(), max)?;
    check_range(bank, address, quantity)?;
    bank.write(address, values)?;
    Ok(quantity)
}

/// Executes `request` against the datastore of the slave `unit_id`.
///
/// Requests are validated before the datastore is touched: quantities
/// outside of the protocol limits are rejected with
/// [`ExceptionCode::IllegalDataValue`], ranges that are not covered by
/// the addressed bank with [`ExceptionCode::IllegalDataAddress`].
///
/// A panicking custom function fails with [`Error::FunctionPanicked`].
///
/// `Ok(None)` means that no response must be sent.
pub fn execute(
    slave: &mut SlaveContext,
    unit_id: UnitId,
    request: &Request<'_>,
    functions: &FunctionRegistry,
) -> Result<Option<Response>, ExecuteError> {
    use crate::frame::Request::*;

    let response = match request {
        ReadCoils(address, quantity) => {
            Response::ReadCoils(read(slave.coils(), *address, *quantity, MAX_READ_BITS)?)
        }
        ReadDiscreteInputs(address, quantity) => Response::ReadDiscreteInputs(read(
            slave.discrete_inputs(),
            *address,
            *quantity,
            MAX_READ_BITS,
        )?),
        ReadHoldingRegisters(address, quantity) => Response::ReadHoldingRegisters(read(
            slave.holding_registers(),
            *address,
            *quantity,
            MAX_READ_WORDS,
        )?),
        ReadInputRegisters(address, quantity) => Response::ReadInputRegisters(read(
            slave.input_registers(),
            *address,
            *quantity,
            MAX_READ_WORDS,
        )?),
        WriteSingleCoil(address, state) => {
            check_range(slave.coils(), *address, 1)?;
            slave.coils_mut().set(*address, *state)?;
            Response::WriteSingleCoil(*address, *state)
        }
        WriteMultipleCoils(address, coils) => {
            let quantity = write(slave.coils_mut(), *address, coils, MAX_WRITE_BITS)?;
            Response::WriteMultipleCoils(*address, quantity)
        }
        WriteSingleRegister(address, word) => {
            check_range(slave.holding_registers(), *address, 1)?;
            slave.holding_registers_mut().set(*address, *word)?;
            Response::WriteSingleRegister(*address, *word)
        }
        WriteMultipleRegisters(address, words) => {
            let quantity = write(
                slave.holding_registers_mut(),
                *address,
                words,
                MAX_WRITE_WORDS,
            )?;
            Response::WriteMultipleRegisters(*address, quantity)
        }
        ReportServerId => Response::ReportServerId(unit_id, true, Vec::new()),
        &MaskWriteRegister(address, and_mask, or_mask) => {
            check_range(slave.holding_registers(), address, 1)?;
            let registers = slave.holding_registers_mut();
            let current = registers.get(address)?;
            registers.set(address, (current & and_mask) | (or_mask & !and_mask))?;
            Response::MaskWriteRegister(address, and_mask, or_mask)
        }
        ReadWriteMultipleRegisters(read_address, read_quantity, write_address, words) => {
            let read_quantity = check_quantity((*read_quantity).into(), MAX_READ_WORDS)?;
            let write_quantity = check_quantity(words.len(), MAX_READ_WRITE_WORDS)?;
            check_range(slave.holding_registers(), *read_address, read_quantity)?;
            check_range(slave.holding_registers(), *write_address, write_quantity)?;
            let registers = slave.holding_registers_mut();
            registers.write(*write_address, words)?;
            Response::ReadWriteMultipleRegisters(registers.read(*read_address, read_quantity)?)
        }
        Custom(code, data) => {
            let Some(function) = functions.get(*code) else {
                return Err(ExceptionCode::IllegalFunction.into());
            };
            return panic::catch_unwind(AssertUnwindSafe(|| function.call(slave, data)))
                .unwrap_or_else(|_| Err(Error::FunctionPanicked(*code).into()));
        }
    };
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use crate::{bytes::Bytes, server::CustomFunction, Word};

    use super::*;

    fn slave() -> SlaveContext {
        SlaveContext::new()
            .with_coils(RegisterBank::with_len(0, 32))
            .with_discrete_inputs(RegisterBank::new(0, vec![true, false, true]))
            .with_holding_registers(RegisterBank::with_len(0, 124))
            .with_input_registers(RegisterBank::new(100, vec![7, 8, 9]))
    }

    fn run(
        slave: &mut SlaveContext,
        request: &Request<'_>,
    ) -> Result<Option<Response>, ExecuteError> {
        execute(slave, 2, request, &FunctionRegistry::new())
    }

    fn exception(result: Result<Option<Response>, ExecuteError>) -> ExceptionCode {
        match result {
            Err(ExecuteError::Exception(code)) => code,
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn read_write_holding_register() {
        let mut slave = slave();
        assert_eq!(
            run(&mut slave, &Request::WriteSingleRegister(10, 5)).unwrap(),
            Some(Response::WriteSingleRegister(10, 5))
        );
        assert_eq!(
            run(&mut slave, &Request::ReadHoldingRegisters(10, 1)).unwrap(),
            Some(Response::ReadHoldingRegisters(vec![5]))
        );
    }

    #[test]
    fn read_input_registers_with_offset() {
        let mut slave = slave();
        assert_eq!(
            run(&mut slave, &Request::ReadInputRegisters(101, 2)).unwrap(),
            Some(Response::ReadInputRegisters(vec![8, 9]))
        );
        assert_eq!(
            exception(run(&mut slave, &Request::ReadInputRegisters(99, 1))),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn read_discrete_inputs() {
        let mut slave = slave();
        assert_eq!(
            run(&mut slave, &Request::ReadDiscreteInputs(1, 2)).unwrap(),
            Some(Response::ReadDiscreteInputs(vec![false, true]))
        );
    }

    #[test]
    fn quantity_limits() {
        let mut slave = slave();
        assert_eq!(
            exception(run(&mut slave, &Request::ReadHoldingRegisters(0, 0))),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            exception(run(&mut slave, &Request::ReadHoldingRegisters(0, 126))),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            exception(run(&mut slave, &Request::ReadCoils(0, 2001))),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            exception(run(
                &mut slave,
                &Request::WriteMultipleRegisters(0, Cow::Owned(vec![0; 124]))
            )),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn out_of_range_write_does_not_mutate() {
        let mut slave = slave();
        let words: Vec<Word> = vec![1, 2, 3];
        assert_eq!(
            exception(run(
                &mut slave,
                &Request::WriteMultipleRegisters(122, Cow::Borrowed(&words))
            )),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(slave.holding_registers().get(122).unwrap(), 0);
        assert_eq!(slave.holding_registers().get(123).unwrap(), 0);
    }

    #[test]
    fn write_multiple_coils() {
        let mut slave = slave();
        let coils = [true, false, true];
        assert_eq!(
            run(&mut slave, &Request::WriteMultipleCoils(4, Cow::Borrowed(&coils))).unwrap(),
            Some(Response::WriteMultipleCoils(4, 3))
        );
        assert_eq!(slave.coils().read(4, 3).unwrap(), coils);
        assert_eq!(
            run(&mut slave, &Request::WriteSingleCoil(4, false)).unwrap(),
            Some(Response::WriteSingleCoil(4, false))
        );
        assert!(!slave.coils().get(4).unwrap());
    }

    #[test]
    fn mask_write_register() {
        let mut slave = slave();
        slave.holding_registers_mut().set(4, 0x12).unwrap();
        assert_eq!(
            run(&mut slave, &Request::MaskWriteRegister(4, 0xF2, 0x25)).unwrap(),
            Some(Response::MaskWriteRegister(4, 0xF2, 0x25))
        );
        assert_eq!(slave.holding_registers().get(4).unwrap(), 0x17);
    }

    #[test]
    fn read_write_multiple_registers() {
        let mut slave = slave();
        let words = [3, 4];
        assert_eq!(
            run(
                &mut slave,
                &Request::ReadWriteMultipleRegisters(1, 3, 2, Cow::Borrowed(&words))
            )
            .unwrap(),
            Some(Response::ReadWriteMultipleRegisters(vec![0, 3, 4]))
        );
    }

    #[test]
    fn report_server_id() {
        let mut slave = slave();
        assert_eq!(
            run(&mut slave, &Request::ReportServerId).unwrap(),
            Some(Response::ReportServerId(2, true, Vec::new()))
        );
    }

    #[test]
    fn unregistered_custom_function() {
        let mut slave = slave();
        assert_eq!(
            exception(run(&mut slave, &Request::Custom(0x41, Cow::Borrowed(&[])))),
            ExceptionCode::IllegalFunction
        );
    }

    #[test]
    fn registered_custom_function() {
        struct Failing;

        impl CustomFunction for Failing {
            fn function_code(&self) -> u8 {
                0x42
            }

            fn call(
                &self,
                slave: &mut SlaveContext,
                _data: &[u8],
            ) -> Result<Option<Response>, ExecuteError> {
                slave.holding_registers().get(500)?;
                Ok(Some(Response::Custom(0x42, Bytes::new())))
            }
        }

        let functions = FunctionRegistry::new().register(Failing).unwrap();
        let mut slave = slave();
        let err = execute(
            &mut slave,
            2,
            &Request::Custom(0x42, Cow::Borrowed(&[])),
            &functions,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Failure(Error::AddressOutOfRange {
                address: 500,
                quantity: 1
            })
        ));
    }

    #[test]
    fn panicking_custom_function() {
        struct Panicking;

        impl CustomFunction for Panicking {
            fn function_code(&self) -> u8 {
                0x41
            }

            fn call(
                &self,
                _slave: &mut SlaveContext,
                _data: &[u8],
            ) -> Result<Option<Response>, ExecuteError> {
                panic!("handler bug");
            }
        }

        let functions = FunctionRegistry::new().register(Panicking).unwrap();
        let mut slave = slave();
        let err = execute(
            &mut slave,
            2,
            &Request::Custom(0x41, Cow::Borrowed(&[])),
            &functions,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExecuteError::Failure(Error::FunctionPanicked(0x41))
        ));
        assert_eq!(err.exception_code(), ExceptionCode::ServerDeviceFailure);
    }
}
