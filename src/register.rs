// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion of register values into their binary representation.
//!
//! Used to trace the contents of the holding registers touched by a
//! request.

use crate::{store::RegisterBank, Address, Error, Quantity, Result, Word};

/// Number of binary digits of a register.
pub const WORD_BITS: usize = 16;

/// Which holding registers are inspected after a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Inspection {
    /// The registers `address + 1 .. address + 1 + count`.
    #[default]
    Shifted,

    /// The registers `address .. address + count`.
    Requested,

    /// Nothing is inspected.
    Disabled,
}

impl Inspection {
    /// The addresses that are inspected for a request range.
    ///
    /// `None` if disabled.
    #[must_use]
    pub fn window(self, address: Address, count: Quantity) -> Option<(u32, u32)> {
        let from = match self {
            Self::Shifted => u32::from(address) + 1,
            Self::Requested => u32::from(address),
            Self::Disabled => return None,
        };
        Some((from, from + u32::from(count)))
    }
}

/// Formats every value as a zero padded binary string, most significant
/// bit first.
///
/// Fails if a value doesn't fit into a register.
pub fn to_words<T>(values: &[T]) -> Result<Vec<String>>
where
    T: Copy + Into<i64>,
{
    values
        .iter()
        .map(|value| {
            let value: i64 = (*value).into();
            let word = Word::try_from(value).map_err(|_| Error::InvalidRegisterValue(value))?;
            Ok(format!("{word:016b}"))
        })
        .collect()
}

/// Splits every word into its single binary digits.
#[must_use]
pub fn to_bits<S>(words: &[S]) -> Vec<Vec<char>>
where
    S: AsRef<str>,
{
    words
        .iter()
        .map(|word| word.as_ref().chars().collect())
        .collect()
}

/// The binary strings of the registers selected by `inspection`.
///
/// Registers outside of the bank are skipped.
#[must_use]
pub fn inspect_words(
    bank: &RegisterBank<Word>,
    inspection: Inspection,
    address: Address,
    count: Quantity,
) -> Vec<String> {
    let Some((from, to)) = inspection.window(address, count) else {
        return Vec::new();
    };
    bank.window(from, to)
        .iter()
        .map(|word| format!("{word:016b}"))
        .collect()
}

/// The binary digits of the registers selected by `inspection`.
#[must_use]
pub fn inspect_bits(
    bank: &RegisterBank<Word>,
    inspection: Inspection,
    address: Address,
    count: Quantity,
) -> Vec<Vec<char>> {
    to_bits(&inspect_words(bank, inspection, address, count))
}
