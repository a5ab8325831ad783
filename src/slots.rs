/*!
    physical slots of the feeder bank

    A slot is identified by the bus address a feeder takes when inserted in it. Only the slot knows where it is on the machine: feeders inherit the location of whichever slot they are currently discovered in.
*/

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
    };
use serde::{Deserialize, Serialize};

use crate::location::Location;


#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub address: u8,
    /// none until the user teaches it, this is the normal state of a new slot
    #[serde(default)]
    pub location: Option<Location>,
}
impl Slot {
    pub const fn new(address: u8) -> Self {
        Self {address, location: None}
    }
}

/// storage of slot locations, provided by the machine configuration
pub trait SlotStore: Send + Sync {
    /// get a slot, creating it without location if never seen before
    fn slot(&self, address: u8) -> Slot;
    fn set_location(&self, address: u8, location: Option<Location>);
    /// all slots ever accessed, ordered by address
    fn slots(&self) -> Vec<Slot>;
}


/// in-memory slot store, persisted as part of [MachineConfig](crate::config::MachineConfig)
#[derive(Debug, Default)]
pub struct Slots {
    slots: Mutex<BTreeMap<u8, Slot>>,
}
impl Slots {
    pub fn new() -> Self {
        Self::default()
    }
    fn lock(&self) -> MutexGuard<'_, BTreeMap<u8, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
impl FromIterator<Slot> for Slots {
    fn from_iter<I: IntoIterator<Item=Slot>>(slots: I) -> Self {
        Self {
            slots: Mutex::new(slots.into_iter()
                .map(|slot| (slot.address, slot))
                .collect()),
        }
    }
}
impl SlotStore for Slots {
    fn slot(&self, address: u8) -> Slot {
        *self.lock().entry(address).or_insert(Slot::new(address))
    }
    fn set_location(&self, address: u8, location: Option<Location>) {
        self.lock().insert(address, Slot {address, location});
    }
    fn slots(&self) -> Vec<Slot> {
        self.lock().values().copied().collect()
    }
}
