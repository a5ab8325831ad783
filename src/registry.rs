/*!
    index of the feeders known to the machine

    The registry owns every [Feeder] and keeps two indexes: by hardware id and by current bus address. It guarantees that

    - at most one feeder exists per hardware id
    - at most one feeder claims a bus address, a feeder taking an address evicts the previous claimant, which then needs to be rediscovered

    All operations take a single lock for a short critical section, it is never held during bus exchanges.
*/

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    };
use log::*;

use crate::{
    error::Error,
    feeder::Feeder,
    packet::HardwareId,
    };


/// handle on a feeder in a [Registry], stable for the feeder's lifetime
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeederId(u32);

#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Feeders>,
}
#[derive(Debug, Default)]
struct Feeders {
    /// ordered by registration
    feeders: BTreeMap<FeederId, Feeder>,
    by_hardware_id: HashMap<HardwareId, FeederId>,
    by_address: HashMap<u8, FeederId>,
    next: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }
    fn lock(&self) -> MutexGuard<'_, Feeders> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// add a feeder, it must not share its hardware id with an already registered feeder
    pub fn register(&self, feeder: Feeder) -> Result<FeederId, Error> {
        self.lock().insert(feeder)
    }
    /// remove a feeder from the machine
    pub fn remove(&self, id: FeederId) -> Option<Feeder> {
        let mut feeders = self.lock();
        let feeder = feeders.feeders.remove(&id)?;
        if let Some(hardware_id) = feeder.hardware_id() {
            feeders.by_hardware_id.remove(&hardware_id);
        }
        if let Some(address) = feeder.slot_address() {
            feeders.by_address.remove(&address);
        }
        Some(feeder)
    }

    /// copy of the current state of a feeder
    pub fn get(&self, id: FeederId) -> Result<Feeder, Error> {
        self.lock().feeders.get(&id).cloned()
            .ok_or(Error::UnknownFeeder(id))
    }
    /// edit the configuration of a feeder
    pub fn update<R>(&self, id: FeederId, edit: impl FnOnce(&mut Feeder) -> R) -> Result<R, Error> {
        let mut feeders = self.lock();
        let feeder = feeders.feeders.get_mut(&id)
            .ok_or(Error::UnknownFeeder(id))?;
        Ok(edit(feeder))
    }
    /// all registered feeders, in registration order
    pub fn ids(&self) -> Vec<FeederId> {
        self.lock().feeders.keys().copied().collect()
    }
    /// copy of all registered feeders, in registration order
    pub fn feeders(&self) -> Vec<(FeederId, Feeder)> {
        self.lock().feeders.iter()
            .map(|(&id, feeder)| (id, feeder.clone()))
            .collect()
    }
    pub fn len(&self) -> usize {
        self.lock().feeders.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find_by_hardware_id(&self, hardware_id: &HardwareId) -> Option<FeederId> {
        self.lock().by_hardware_id.get(hardware_id).copied()
    }
    pub fn find_by_slot_address(&self, address: u8) -> Option<FeederId> {
        self.lock().by_address.get(&address).copied()
    }
    /// first feeder without hardware id, a placeholder waiting for a physical feeder
    pub fn find_unconfigured(&self) -> Option<FeederId> {
        self.lock().unconfigured()
    }
    /**
        find the feeder owning a hardware id, or create it

        when `bind_placeholder` is set, a feeder without hardware id is preferred over creating a new one.
        Returns the feeder and whether it was just created.
    */
    pub fn resolve(&self, hardware_id: HardwareId, bind_placeholder: bool) -> Result<(FeederId, bool), Error> {
        let mut feeders = self.lock();
        if let Some(&id) = feeders.by_hardware_id.get(&hardware_id)
            {return Ok((id, false))}
        if bind_placeholder {
            if let Some(id) = feeders.unconfigured() {
                feeders.bind(id, hardware_id)?;
                return Ok((id, false));
            }
        }
        let id = feeders.insert(Feeder::with_hardware_id(hardware_id))?;
        debug!("new feeder {} registered", hardware_id);
        Ok((id, true))
    }

    /// give a hardware id to a feeder, usually a placeholder
    pub fn set_hardware_id(&self, id: FeederId, hardware_id: HardwareId) -> Result<(), Error> {
        self.lock().bind(id, hardware_id)
    }
    /**
        record that a feeder answers at the given address

        any other feeder believed to be at that address is evicted: its address and initialization are cleared. Returns the evicted feeder.
    */
    pub fn assign_address(&self, id: FeederId, address: u8) -> Result<Option<FeederId>, Error> {
        self.lock().assign(id, Some(address))
    }
    /// forget the address of a feeder, it must be rediscovered before use
    pub fn clear_address(&self, id: FeederId) -> Result<(), Error> {
        self.lock().assign(id, None).map(|_| ())
    }
    pub(crate) fn set_initialized(&self, id: FeederId, initialized: bool) -> Result<(), Error> {
        self.update(id, |feeder| feeder.set_initialized(initialized))
    }
}

impl Feeders {
    fn insert(&mut self, mut feeder: Feeder) -> Result<FeederId, Error> {
        if let Some(hardware_id) = feeder.hardware_id() {
            if self.by_hardware_id.contains_key(&hardware_id)
                {return Err(Error::DuplicateHardwareId(hardware_id))}
        }
        let id = FeederId(self.next);
        self.next += 1;

        let address = feeder.slot_address();
        feeder.set_slot_address(None);
        if let Some(hardware_id) = feeder.hardware_id() {
            self.by_hardware_id.insert(hardware_id, id);
        }
        self.feeders.insert(id, feeder);
        if let Some(address) = address {
            self.assign(id, Some(address))?;
        }
        Ok(id)
    }
    fn unconfigured(&self) -> Option<FeederId> {
        self.feeders.iter()
            .find(|(_, feeder)| feeder.hardware_id().is_none())
            .map(|(&id, _)| id)
    }
    fn bind(&mut self, id: FeederId, hardware_id: HardwareId) -> Result<(), Error> {
        match self.by_hardware_id.get(&hardware_id) {
            Some(&owner) if owner == id => return Ok(()),
            Some(_) => return Err(Error::DuplicateHardwareId(hardware_id)),
            None => {},
        }
        let feeder = self.feeders.get_mut(&id)
            .ok_or(Error::UnknownFeeder(id))?;
        if let Some(previous) = feeder.hardware_id() {
            self.by_hardware_id.remove(&previous);
        }
        feeder.set_hardware_id(Some(hardware_id));
        self.by_hardware_id.insert(hardware_id, id);
        Ok(())
    }
    fn assign(&mut self, id: FeederId, address: Option<u8>) -> Result<Option<FeederId>, Error> {
        let previous = self.feeders.get(&id)
            .ok_or(Error::UnknownFeeder(id))?
            .slot_address();

        let mut evicted = None;
        if let Some(address) = address {
            if let Some(&other) = self.by_address.get(&address) {
                if other != id {
                    if let Some(feeder) = self.feeders.get_mut(&other) {
                        warn!("feeder {} evicted from address {}", feeder.describe(), address);
                        feeder.set_slot_address(None);
                    }
                    evicted = Some(other);
                }
            }
        }
        if let Some(previous) = previous {
            if self.by_address.get(&previous) == Some(&id) {
                self.by_address.remove(&previous);
            }
        }
        if let Some(address) = address {
            self.by_address.insert(address, id);
        }
        if let Some(feeder) = self.feeders.get_mut(&id) {
            if previous != address {
                debug!("feeder {} moves from address {:?} to {:?}", feeder.describe(), previous, address);
            }
            feeder.set_slot_address(address);
        }
        Ok(evicted)
    }
}
