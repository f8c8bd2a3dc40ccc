// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User defined function codes.

use std::{collections::BTreeMap, fmt, ops::Deref};

use crate::{store::SlaveContext, Error, Response, Result};

use super::ExecuteError;

/// A handler for a user defined function code.
///
/// Requests with a registered function code are decoded as
/// [`Request::Custom`](crate::Request::Custom), even if the code belongs
/// to a standard function.
pub trait CustomFunction: Send + Sync {
    /// The handled function code, must be less than `0x80`.
    fn function_code(&self) -> u8;

    /// Executes the request data (without the function code) against the
    /// addressed slave.
    ///
    /// Returning `Ok(None)` suppresses the response.
    fn call(
        &self,
        slave: &mut SlaveContext,
        data: &[u8],
    ) -> std::result::Result<Option<Response>, ExecuteError>;
}

impl<D> CustomFunction for D
where
    D: Deref + Send + Sync + ?Sized,
    D::Target: CustomFunction,
{
    /// A forwarding blanket impl to support smart pointers around [`CustomFunction`].
    fn function_code(&self) -> u8 {
        self.deref().function_code()
    }

    fn call(
        &self,
        slave: &mut SlaveContext,
        data: &[u8],
    ) -> std::result::Result<Option<Response>, ExecuteError> {
        self.deref().call(slave, data)
    }
}

/// The table of custom functions.
///
/// Populated before serving and shared read-only by all connections.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<u8, Box<dyn CustomFunction>>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, replacing any previous handler for the same code.
    pub fn register(mut self, function: impl CustomFunction + 'static) -> Result<Self> {
        let code = function.function_code();
        if code >= 0x80 {
            return Err(Error::InvalidFunctionCode(code));
        }
        self.functions.insert(code, Box::new(function));
        Ok(self)
    }

    #[must_use]
    pub fn contains(&self, code: u8) -> bool {
        self.functions.contains_key(&code)
    }

    #[must_use]
    pub fn get(&self, code: u8) -> Option<&dyn CustomFunction> {
        self.functions.get(&code).map(|function| &**function)
    }

    /// The registered function codes in ascending order.
    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.functions.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("codes", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::bytes::Bytes;

    use super::*;

    struct Fixed(u8);

    impl CustomFunction for Fixed {
        fn function_code(&self) -> u8 {
            self.0
        }

        fn call(
            &self,
            _slave: &mut SlaveContext,
            data: &[u8],
        ) -> std::result::Result<Option<Response>, ExecuteError> {
            Ok(Some(Response::Custom(self.0, Bytes::copy_from_slice(data))))
        }
    }

    #[test]
    fn register_functions() {
        let functions = FunctionRegistry::new()
            .register(Fixed(0x41))
            .unwrap()
            .register(Box::new(Fixed(0x03)))
            .unwrap();
        assert!(functions.contains(0x41));
        assert!(functions.contains(0x03));
        assert!(!functions.contains(0x42));
        assert_eq!(functions.codes().collect::<Vec<_>>(), vec![0x03, 0x41]);
        assert_eq!(functions.get(0x41).unwrap().function_code(), 0x41);
    }

    #[test]
    fn reject_exception_codes() {
        let err = FunctionRegistry::new().register(Fixed(0x80)).unwrap_err();
        assert!(matches!(err, Error::InvalidFunctionCode(0x80)));
    }

    #[test]
    fn call_registered_function() {
        let functions = FunctionRegistry::new().register(Fixed(0x41)).unwrap();
        let mut slave = SlaveContext::new();
        let rsp = functions
            .get(0x41)
            .unwrap()
            .call(&mut slave, &[1, 2])
            .unwrap();
        assert_eq!(rsp, Some(Response::Custom(0x41, Bytes::from_static(&[1, 2]))));
    }
}
