// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register datastores of the slaves.
//!
//! A [`ServerContext`] maps unit ids onto [`SlaveContext`]s. Each
//! [`SlaveContext`] owns four [`RegisterBank`]s and is guarded by its
//! own mutex, because the datastore is shared between all connections.

use std::{
    collections::{hash_map::Entry, HashMap},
    ops::Range,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{Address, Coil, Error, Quantity, Result, UnitId, Word, BROADCAST_UNIT_ID};

/// A sequential block of coils or registers.
///
/// The first value is located at the start address, all following
/// values at consecutive addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterBank<T> {
    start: Address,
    values: Vec<T>,
}

impl<T> RegisterBank<T>
where
    T: Copy + Default,
{
    #[must_use]
    pub fn new(start: Address, values: Vec<T>) -> Self {
        Self { start, values }
    }

    /// A bank of `len` default initialized values.
    #[must_use]
    pub fn with_len(start: Address, len: usize) -> Self {
        Self::new(start, vec![T::default(); len])
    }

    #[must_use]
    pub fn start(&self) -> Address {
        self.start
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    fn indices(&self, address: Address, quantity: usize) -> Option<Range<usize>> {
        let first = usize::from(address.checked_sub(self.start)?);
        let last = first.checked_add(quantity)?;
        (last <= self.values.len()).then_some(first..last)
    }

    /// Checks if `quantity` values starting at `address` are covered by
    /// this bank.
    #[must_use]
    pub fn validate(&self, address: Address, quantity: Quantity) -> bool {
        self.indices(address, quantity.into()).is_some()
    }

    pub fn read(&self, address: Address, quantity: Quantity) -> Result<Vec<T>> {
        let range = self
            .indices(address, quantity.into())
            .ok_or(Error::AddressOutOfRange { address, quantity })?;
        Ok(self.values[range].to_vec())
    }

    pub fn write(&mut self, address: Address, values: &[T]) -> Result<()> {
        let range = self
            .indices(address, values.len())
            .ok_or_else(|| Error::AddressOutOfRange {
                address,
                quantity: Quantity::try_from(values.len()).unwrap_or(Quantity::MAX),
            })?;
        self.values[range].copy_from_slice(values);
        Ok(())
    }

    pub fn get(&self, address: Address) -> Result<T> {
        self.indices(address, 1)
            .map(|range| self.values[range.start])
            .ok_or(Error::AddressOutOfRange {
                address,
                quantity: 1,
            })
    }

    pub fn set(&mut self, address: Address, value: T) -> Result<()> {
        self.write(address, std::slice::from_ref(&value))
    }

    /// The values at the addresses `from..to`, clamped to this bank.
    ///
    /// Never fails: parts of the range outside of the bank are skipped.
    #[must_use]
    pub fn window(&self, from: u32, to: u32) -> &[T] {
        let start = u32::from(self.start);
        let len = self.values.len();
        let clamp = |address: u32| {
            usize::try_from(address.saturating_sub(start)).map_or(len, |index| index.min(len))
        };
        let (first, last) = (clamp(from), clamp(to));
        if first >= last {
            return &[];
        }
        &self.values[first..last]
    }
}

/// The datastore of a single slave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlaveContext {
    coils: RegisterBank<Coil>,
    discrete_inputs: RegisterBank<Coil>,
    holding_registers: RegisterBank<Word>,
    input_registers: RegisterBank<Word>,
}

impl SlaveContext {
    /// A slave with empty banks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_coils(mut self, coils: RegisterBank<Coil>) -> Self {
        self.coils = coils;
        self
    }

    #[must_use]
    pub fn with_discrete_inputs(mut self, discrete_inputs: RegisterBank<Coil>) -> Self {
        self.discrete_inputs = discrete_inputs;
        self
    }

    #[must_use]
    pub fn with_holding_registers(mut self, holding_registers: RegisterBank<Word>) -> Self {
        self.holding_registers = holding_registers;
        self
    }

    #[must_use]
    pub fn with_input_registers(mut self, input_registers: RegisterBank<Word>) -> Self {
        self.input_registers = input_registers;
        self
    }

    #[must_use]
    pub fn coils(&self) -> &RegisterBank<Coil> {
        &self.coils
    }

    pub fn coils_mut(&mut self) -> &mut RegisterBank<Coil> {
        &mut self.coils
    }

    #[must_use]
    pub fn discrete_inputs(&self) -> &RegisterBank<Coil> {
        &self.discrete_inputs
    }

    pub fn discrete_inputs_mut(&mut self) -> &mut RegisterBank<Coil> {
        &mut self.discrete_inputs
    }

    #[must_use]
    pub fn holding_registers(&self) -> &RegisterBank<Word> {
        &self.holding_registers
    }

    pub fn holding_registers_mut(&mut self) -> &mut RegisterBank<Word> {
        &mut self.holding_registers
    }

    #[must_use]
    pub fn input_registers(&self) -> &RegisterBank<Word> {
        &self.input_registers
    }

    pub fn input_registers_mut(&mut self) -> &mut RegisterBank<Word> {
        &mut self.input_registers
    }
}

/// Locks a slave, even if another thread panicked while holding the lock.
///
/// Every bank write replaces a validated range at once, so the banks stay
/// consistent when a request is interrupted.
pub(crate) fn lock_slave(slave: &Mutex<SlaveContext>) -> MutexGuard<'_, SlaveContext> {
    slave.lock().unwrap_or_else(PoisonError::into_inner)
}

/// All slaves that are addressable through a server.
#[derive(Debug)]
pub struct ServerContext {
    slaves: HashMap<UnitId, Mutex<SlaveContext>>,
    single: bool,
    broadcast_enabled: bool,
    ignore_missing_slaves: bool,
}

impl ServerContext {
    /// A context with a single slave that answers to every unit id.
    #[must_use]
    pub fn single(slave: SlaveContext) -> Self {
        Self {
            slaves: HashMap::from([(0, Mutex::new(slave))]),
            single: true,
            broadcast_enabled: false,
            ignore_missing_slaves: false,
        }
    }

    /// A context with multiple slaves that are selected by their unit id.
    pub fn multi<I>(slaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = (UnitId, SlaveContext)>,
    {
        let mut map = HashMap::new();
        for (unit_id, slave) in slaves {
            match map.entry(unit_id) {
                Entry::Occupied(_) => return Err(Error::DuplicateUnitId(unit_id)),
                Entry::Vacant(entry) => {
                    entry.insert(Mutex::new(slave));
                }
            }
        }
        Ok(Self {
            slaves: map,
            single: false,
            broadcast_enabled: false,
            ignore_missing_slaves: false,
        })
    }

    /// Execute requests to unit id `0` on all slaves without responding.
    #[must_use]
    pub fn broadcast_enabled(mut self, broadcast_enabled: bool) -> Self {
        self.broadcast_enabled = broadcast_enabled;
        self
    }

    /// Do not respond to requests for unknown unit ids.
    #[must_use]
    pub fn ignore_missing_slaves(mut self, ignore_missing_slaves: bool) -> Self {
        self.ignore_missing_slaves = ignore_missing_slaves;
        self
    }

    #[must_use]
    pub fn is_single(&self) -> bool {
        self.single
    }

    #[must_use]
    pub fn is_broadcast_enabled(&self) -> bool {
        self.broadcast_enabled
    }

    #[must_use]
    pub fn ignores_missing_slaves(&self) -> bool {
        self.ignore_missing_slaves
    }

    /// Look up the slave for `unit_id`.
    ///
    /// In single mode the only slave is returned regardless of `unit_id`.
    pub fn slave(&self, unit_id: UnitId) -> Result<&Mutex<SlaveContext>> {
        let key = if self.single { 0 } else { unit_id };
        self.slaves.get(&key).ok_or(Error::NoSuchSlave(unit_id))
    }

    /// Lock the slave for `unit_id`.
    pub fn lock(&self, unit_id: UnitId) -> Result<MutexGuard<'_, SlaveContext>> {
        self.slave(unit_id).map(lock_slave)
    }

    /// Access the slave for `unit_id` exclusively.
    pub fn with_slave<R>(
        &self,
        unit_id: UnitId,
        f: impl FnOnce(&mut SlaveContext) -> R,
    ) -> Result<R> {
        let mut slave = self.lock(unit_id)?;
        Ok(f(&mut slave))
    }

    /// All configured unit ids in ascending order.
    #[must_use]
    pub fn unit_ids(&self) -> Vec<UnitId> {
        let mut unit_ids: Vec<_> = self.slaves.keys().copied().collect();
        unit_ids.sort_unstable();
        unit_ids
    }

    /// The unit ids a connection accepts requests for.
    ///
    /// Includes the broadcast unit id `0` if broadcasts are enabled.
    #[must_use]
    pub fn target_unit_ids(&self) -> Vec<UnitId> {
        let mut unit_ids = self.unit_ids();
        if self.broadcast_enabled && !unit_ids.contains(&BROADCAST_UNIT_ID) {
            unit_ids.push(BROADCAST_UNIT_ID);
        }
        unit_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding_registers() -> RegisterBank<Word> {
        RegisterBank::new(0, (0..10).collect())
    }

    #[test]
    fn read_bank() {
        let bank = holding_registers();
        assert_eq!(bank.read(2, 3).unwrap(), vec![2, 3, 4]);
        assert_eq!(bank.read(0, 10).unwrap().len(), 10);
        assert_eq!(bank.read(10, 0).unwrap(), Vec::<Word>::new());
        assert!(matches!(
            bank.read(8, 3),
            Err(Error::AddressOutOfRange {
                address: 8,
                quantity: 3
            })
        ));
    }

    #[test]
    fn bank_with_start_address() {
        let mut bank = RegisterBank::<Word>::with_len(100, 4);
        assert!(bank.validate(100, 4));
        assert!(!bank.validate(99, 1));
        assert!(!bank.validate(101, 4));
        bank.set(103, 7).unwrap();
        assert_eq!(bank.get(103).unwrap(), 7);
        assert!(bank.get(104).is_err());
        assert!(bank.get(0).is_err());
    }

    #[test]
    fn write_bank() {
        let mut bank = holding_registers();
        bank.write(8, &[80, 90]).unwrap();
        assert_eq!(bank.read(7, 3).unwrap(), vec![7, 80, 90]);
        assert!(bank.write(9, &[1, 2]).is_err());
        // Nothing is written if the range is invalid
        assert_eq!(bank.get(9).unwrap(), 90);
    }

    #[test]
    fn window_is_clamped() {
        let bank = holding_registers();
        assert_eq!(bank.window(3, 5), &[3, 4]);
        assert_eq!(bank.window(8, 20), &[8, 9]);
        assert_eq!(bank.window(11, 12), &[] as &[Word]);
        assert_eq!(bank.window(5, 5), &[] as &[Word]);
        assert_eq!(bank.window(6, 2), &[] as &[Word]);

        let bank = RegisterBank::new(10, vec![1, 2, 3]);
        assert_eq!(bank.window(0, 11), &[1]);
    }

    #[test]
    fn multi_context() {
        let context =
            ServerContext::multi([(2, SlaveContext::new()), (1, SlaveContext::new())]).unwrap();
        assert!(!context.is_single());
        assert_eq!(context.unit_ids(), vec![1, 2]);
        assert!(context.slave(1).is_ok());
        assert!(matches!(context.slave(3), Err(Error::NoSuchSlave(3))));
    }

    #[test]
    fn duplicate_unit_ids() {
        let res = ServerContext::multi([(2, SlaveContext::new()), (2, SlaveContext::new())]);
        assert!(matches!(res, Err(Error::DuplicateUnitId(2))));
    }

    #[test]
    fn single_context_ignores_unit_id() {
        let slave = SlaveContext::new().with_holding_registers(holding_registers());
        let context = ServerContext::single(slave);
        assert!(context.is_single());
        assert_eq!(context.unit_ids(), vec![0]);
        let value = context
            .with_slave(42, |slave| slave.holding_registers().get(4))
            .unwrap()
            .unwrap();
        assert_eq!(value, 4);
    }

    #[test]
    fn target_unit_ids() {
        let context = ServerContext::multi([(2, SlaveContext::new())]).unwrap();
        assert_eq!(context.target_unit_ids(), vec![2]);

        let context = context.broadcast_enabled(true);
        assert_eq!(context.target_unit_ids(), vec![2, 0]);

        let context = ServerContext::single(SlaveContext::new()).broadcast_enabled(true);
        assert_eq!(context.target_unit_ids(), vec![0]);
    }

    #[test]
    fn poisoned_slave_is_recovered() {
        let slave = SlaveContext::new().with_holding_registers(holding_registers());
        let context = ServerContext::multi([(1, slave)]).unwrap();
        let res = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let mut slave = context.lock(1).unwrap();
                    slave.holding_registers_mut().set(3, 30).unwrap();
                    panic!("interrupted while holding the lock");
                })
                .join()
        });
        assert!(res.is_err());
        assert!(context.slave(1).unwrap().is_poisoned());

        let value = context
            .with_slave(1, |slave| slave.holding_registers().get(3))
            .unwrap()
            .unwrap();
        assert_eq!(value, 30);
    }

    #[test]
    fn flags() {
        let context = ServerContext::multi([])
            .unwrap()
            .broadcast_enabled(true)
            .ignore_missing_slaves(true);
        assert!(context.is_broadcast_enabled());
        assert!(context.ignores_missing_slaves());
    }
}
