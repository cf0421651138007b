//! Pump arena
//!
//! Units are addressed by stable id. Which job holds which pump is tracked
//! in a claim table with its own lock, separate from the per-pump locks. A
//! claim is released when its guard is dropped.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::pubsub;
use heapless::Vec;

use super::{PumpState, PumpUnit};
use crate::config::{ConfigError, PumpConfig, PumpId, MAX_PUMPS};
use crate::state::{EventBus, EventSubscriber};
use crate::traits::PumpDriver;

/// Owner of a pump claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Holder {
    /// Preparation session id
    Session(u32),
    /// Cleaning cycle id
    Cycle(u32),
}

/// Claim failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClaimError {
    /// A requested pump is held, or the array is held exclusively
    Busy,
    /// No pump with this id
    UnknownPump(PumpId),
}

#[derive(Debug, Default)]
struct ClaimTable {
    holders: [Option<Holder>; MAX_PUMPS],
    exclusive: Option<Holder>,
}

/// All pumps of the machine
pub struct PumpArray<D> {
    units: Vec<PumpUnit<D>, MAX_PUMPS>,
    claims: Mutex<CriticalSectionRawMutex, RefCell<ClaimTable>>,
    events: EventBus,
}

impl<D: PumpDriver> PumpArray<D> {
    /// Build the array from the pump table
    pub fn new(
        configs: &[PumpConfig],
        mut make_driver: impl FnMut(&PumpConfig) -> D,
    ) -> Result<Self, ConfigError> {
        let mut units = Vec::new();
        for config in configs {
            units
                .push(PumpUnit::new(config, make_driver(config)))
                .map_err(|_| ConfigError::TooManyPumps)?;
        }

        Ok(Self {
            units,
            claims: Mutex::new(RefCell::new(ClaimTable::default())),
            events: EventBus::new(),
        })
    }

    /// Look up a pump by id
    pub fn get(&self, id: PumpId) -> Option<&PumpUnit<D>> {
        self.units.iter().find(|u| u.id() == id)
    }

    /// Iterate over all pumps
    pub fn iter(&self) -> impl Iterator<Item = &PumpUnit<D>> {
        self.units.iter()
    }

    /// Number of pumps
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the array has no pumps
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Progress event bus
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> Result<EventSubscriber<'_>, pubsub::Error> {
        self.events.subscriber()
    }

    /// Runtime state of a pump
    pub fn state(&self, id: PumpId) -> Option<PumpState> {
        self.get(id).map(|u| u.state())
    }

    /// Run `f` with exclusive access to a pump's driver
    pub fn with_driver<R>(&self, id: PumpId, f: impl FnOnce(&mut D) -> R) -> Option<R> {
        self.get(id).map(|u| u.with_driver(f))
    }

    /// Halt every pump
    pub fn halt_all(&self) {
        for unit in &self.units {
            unit.halt(&self.events);
        }
    }

    /// Current holder of a pump
    pub fn holder(&self, id: PumpId) -> Option<Holder> {
        let slot = self.slot(id)?;
        self.claims.lock(|table| table.borrow().holders[slot])
    }

    /// Whether any pump is held or the array is held exclusively
    pub fn any_claimed(&self) -> bool {
        self.claims.lock(|table| {
            let table = table.borrow();
            table.exclusive.is_some() || table.holders.iter().any(|h| h.is_some())
        })
    }

    /// Claim every pump in `ids`, or none of them
    pub fn claim(&self, ids: &[PumpId], holder: Holder) -> Result<Claim<'_, D>, ClaimError> {
        let mask = self.mask(ids)?;
        self.claims.lock(|table| {
            let mut table = table.borrow_mut();
            if table.exclusive.is_some() || held(&table, mask) != 0 {
                return Err(ClaimError::Busy);
            }
            assign(&mut table, mask, holder);
            Ok(self.guard(holder, mask, false))
        })
    }

    /// Claim `ids` and lock the whole array against other claims
    ///
    /// Fails if any requested pump is already held.
    pub fn claim_exclusive(
        &self,
        ids: &[PumpId],
        holder: Holder,
    ) -> Result<Claim<'_, D>, ClaimError> {
        let mask = self.mask(ids)?;
        self.claims.lock(|table| {
            let mut table = table.borrow_mut();
            if table.exclusive.is_some() || held(&table, mask) != 0 {
                return Err(ClaimError::Busy);
            }
            table.exclusive = Some(holder);
            assign(&mut table, mask, holder);
            Ok(self.guard(holder, mask, true))
        })
    }

    /// Claim whichever pumps in `ids` are free
    ///
    /// Fails only when the array is held exclusively.
    pub fn claim_available(
        &self,
        ids: &[PumpId],
        holder: Holder,
    ) -> Result<Claim<'_, D>, ClaimError> {
        let requested = self.mask(ids)?;
        self.claims.lock(|table| {
            let mut table = table.borrow_mut();
            if table.exclusive.is_some() {
                return Err(ClaimError::Busy);
            }
            let mask = requested & !held(&table, requested);
            assign(&mut table, mask, holder);
            Ok(self.guard(holder, mask, false))
        })
    }

    fn slot(&self, id: PumpId) -> Option<usize> {
        self.units.iter().position(|u| u.id() == id)
    }

    fn mask(&self, ids: &[PumpId]) -> Result<u16, ClaimError> {
        ids.iter().try_fold(0u16, |mask, &id| {
            let slot = self.slot(id).ok_or(ClaimError::UnknownPump(id))?;
            Ok(mask | (1 << slot))
        })
    }

    fn guard(&self, holder: Holder, mask: u16, exclusive: bool) -> Claim<'_, D> {
        Claim {
            pumps: self,
            holder,
            mask,
            exclusive,
        }
    }
}

fn held(table: &ClaimTable, mask: u16) -> u16 {
    table
        .holders
        .iter()
        .enumerate()
        .filter(|(_, h)| h.is_some())
        .fold(0u16, |acc, (slot, _)| acc | (1 << slot))
        & mask
}

fn assign(table: &mut ClaimTable, mask: u16, holder: Holder) {
    for (slot, h) in table.holders.iter_mut().enumerate() {
        if mask & (1 << slot) != 0 {
            *h = Some(holder);
        }
    }
}

/// Pumps held by one job; released on drop
pub struct Claim<'a, D> {
    pumps: &'a PumpArray<D>,
    holder: Holder,
    mask: u16,
    exclusive: bool,
}

impl<D: PumpDriver> Claim<'_, D> {
    /// Who holds the claim
    pub fn holder(&self) -> Holder {
        self.holder
    }

    /// Whether the claim covers a pump
    pub fn holds(&self, id: PumpId) -> bool {
        self.pumps
            .slot(id)
            .is_some_and(|slot| self.mask & (1 << slot) != 0)
    }

    /// Number of pumps covered
    pub fn len(&self) -> usize {
        self.mask.count_ones() as usize
    }

    /// Check if the claim covers no pump
    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }
}

impl<D> Drop for Claim<'_, D> {
    fn drop(&mut self) {
        let (mask, holder, exclusive) = (self.mask, self.holder, self.exclusive);
        self.pumps.claims.lock(|table| {
            let mut table = table.borrow_mut();
            for (slot, h) in table.holders.iter_mut().enumerate() {
                if mask & (1 << slot) != 0 && *h == Some(holder) {
                    *h = None;
                }
            }
            if exclusive && table.exclusive == Some(holder) {
                table.exclusive = None;
            }
        });
    }
}
