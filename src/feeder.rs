/*!
    the feeder aggregate: identity, volatile bus state and persisted configuration

    Fields tracked by the [Registry](crate::registry::Registry) indexes (hardware id and slot address) can only be changed through the registry. Everything else is edited with [Registry::update](crate::registry::Registry::update).
*/

use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    location::Location,
    packet::HardwareId,
    slots::SlotStore,
    utils::strip_slot_suffix,
    };


/// feed distance per part when nothing else is configured, in millimeters
pub const DEFAULT_PART_PITCH: u8 = 4;
/// maximum vision correction applied to the pick location, in millimeters
const CORRECTION_LIMIT: f64 = 5.0;
/// resolution of feed distances, in millimeters
const FEED_TICK: f64 = 0.1;
/// slots above this one are on the back row, where tape advances opposite to the front row
const FRONT_ROW_END: u8 = 25;


/// what to do on the next feed request
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedOptions {
    #[default]
    Normal,
    /// a part was put back in the tape, do not advance on next feed
    SkipNext,
    /// never advance the tape
    Disable,
}

/// progress of a feeder toward accepting feed commands
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FeederState {
    /// no hardware id, this feeder cannot be addressed
    Unconfigured,
    AddressUnknown,
    /// address known, initialization handshake not done
    Uninitialized,
    Ready,
}

/// configuration problem preventing a feeder from being used
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Issue {
    /// the feeder sits in a slot which has no location
    UnconfiguredSlot(u8),
    NoLocationOffset,
}

/// correction applied to the feed distance to compensate drift measured by vision
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) struct FeedNudge {
    /// feed ticks added to the part pitch
    pub ticks: i32,
    /// amount removed from the pick correction by this nudge
    pub offset: Location,
}


#[derive(Clone, Debug)]
pub struct Feeder {
    hardware_id: Option<HardwareId>,
    slot_address: Option<u8>,
    initialized: bool,

    name: String,
    part: Option<String>,
    part_pitch: u8,
    offset: Option<Location>,
    enabled: bool,
    feed_options: FeedOptions,

    /// pick error accumulated from vision since the last reset
    pick_correction: Location,
    visions_since_feed: u32,
}

impl Default for Feeder {
    fn default() -> Self {
        Self::new()
    }
}

impl Feeder {
    /// feeder placeholder, waiting for a discovery to bind it to a physical feeder
    pub fn new() -> Self {
        Self {
            hardware_id: None,
            slot_address: None,
            initialized: false,
            name: String::new(),
            part: None,
            part_pitch: DEFAULT_PART_PITCH,
            offset: None,
            enabled: true,
            feed_options: FeedOptions::Normal,
            pick_correction: Location::ORIGIN,
            visions_since_feed: 0,
        }
    }
    pub fn with_hardware_id(hardware_id: HardwareId) -> Self {
        let mut feeder = Self::new();
        feeder.set_hardware_id(Some(hardware_id));
        feeder
    }

    pub fn hardware_id(&self) -> Option<HardwareId> {self.hardware_id}
    /// current bus address, also the number of the physical slot the feeder is inserted in
    pub fn slot_address(&self) -> Option<u8> {self.slot_address}
    pub fn is_initialized(&self) -> bool {self.initialized}
    pub fn part(&self) -> Option<&str> {self.part.as_deref()}
    /// feed distance per part, in millimeters
    pub fn part_pitch(&self) -> u8 {self.part_pitch}
    pub fn offset(&self) -> Option<Location> {self.offset}
    pub fn is_enabled(&self) -> bool {self.enabled}
    pub fn feed_options(&self) -> FeedOptions {self.feed_options}
    pub fn pick_correction(&self) -> Location {self.pick_correction}

    pub fn state(&self) -> FeederState {
        match (self.hardware_id, self.slot_address, self.initialized) {
            (None, _, _) => FeederState::Unconfigured,
            (Some(_), None, _) => FeederState::AddressUnknown,
            (Some(_), Some(_), false) => FeederState::Uninitialized,
            (Some(_), Some(_), true) => FeederState::Ready,
        }
    }

    /// label given by the user, without slot marker
    pub fn label(&self) -> &str {&self.name}
    /// label followed by the current slot, as displayed to the user
    pub fn name(&self) -> String {
        if self.hardware_id.is_none()
            {return String::from("Unconfigured feeder")}
        match self.slot_address {
            Some(address) => format!("{} (Slot: {})", self.name, address),
            None => format!("{} (Slot: None)", self.name),
        }
    }
    /// set the user label, any slot marker copied from [Self::name] is dropped
    pub fn set_name(&mut self, name: &str) {
        self.name = strip_slot_suffix(name);
    }
    pub fn set_part(&mut self, part: Option<String>) {
        self.part = part;
    }
    pub fn set_part_pitch(&mut self, part_pitch: u8) {
        self.part_pitch = part_pitch;
        self.reset_correction();
    }
    pub fn set_offset(&mut self, offset: Option<Location>) {
        self.offset = offset;
        self.reset_correction();
    }
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
    pub fn set_feed_options(&mut self, options: FeedOptions) {
        self.feed_options = options;
    }

    /// hardware id as printed in messages
    pub(crate) fn describe(&self) -> String {
        match self.hardware_id {
            Some(id) => id.to_string(),
            None => String::from("unconfigured"),
        }
    }

    /// whether the feeder can take part in a job
    pub fn is_usable(&self, slots: &dyn SlotStore) -> bool {
        self.enabled
            && self.hardware_id.is_some()
            && self.part.is_some()
            && self.verify_location(slots).is_ok()
    }
    /// configuration problems worth reporting to the user
    pub fn issues(&self, slots: &dyn SlotStore) -> Vec<Issue> {
        let mut issues = Vec::new();
        if self.hardware_id.is_none()
            {return issues}
        if let Some(address) = self.slot_address {
            if slots.slot(address).location.is_none() {
                issues.push(Issue::UnconfiguredSlot(address));
            }
        }
        if self.offset.is_none() {
            issues.push(Issue::NoLocationOffset);
        }
        issues
    }

    /// check everything needed to compute a pick location, returning the slot location and the feeder offset
    pub fn verify_location(&self, slots: &dyn SlotStore) -> Result<(Location, Location), Error> {
        let address = self.slot_address
            .ok_or_else(|| Error::NoSlotAddress(self.describe()))?;
        let slot = slots.slot(address).location
            .ok_or(Error::UnconfiguredSlot(address))?;
        let offset = self.offset
            .ok_or_else(|| Error::NoLocationOffset(self.describe()))?;
        Ok((slot, offset))
    }
    /// where a part should be picked, ignoring vision corrections
    pub fn base_pick_location(&self, slots: &dyn SlotStore) -> Result<Location, Error> {
        let (slot, offset) = self.verify_location(slots)?;
        Ok(offset.offset_with_rotation_from(slot))
    }
    /// where a part should be picked
    pub fn pick_location(&self, slots: &dyn SlotStore) -> Result<Location, Error> {
        Ok(self.base_pick_location(slots)? + self.pick_correction)
    }

    /**
        accumulate a pick error measured by bottom vision

        each new measurement since the last feed weights half the previous one, so repeated measurements of the same part converge without overshooting. The total correction is saturated to avoid crashing into the feeder.
    */
    pub fn apply_vision_correction(&mut self, error: Location, slots: &dyn SlotStore) -> Result<(), Error> {
        let pick = self.base_pick_location(slots)?;
        let exponent = i32::try_from(self.visions_since_feed).unwrap_or(i32::MAX - 1);
        let factor = 0.5_f64.powi(exponent.saturating_add(1));
        self.visions_since_feed = self.visions_since_feed.saturating_add(1);

        let before = self.pick_correction;
        self.pick_correction = self.pick_correction + error.rotate_xy(pick.rotation) * factor;
        let distance = self.pick_correction.planar_distance();
        if distance > CORRECTION_LIMIT {
            self.pick_correction = self.pick_correction * (CORRECTION_LIMIT / distance);
        }
        debug!("{}: vision reports pick error {:?}, correction {:?} -> {:?}",
            self.name(), error, before, self.pick_correction);
        Ok(())
    }

    pub(crate) fn set_hardware_id(&mut self, hardware_id: Option<HardwareId>) {
        if self.name.is_empty() {
            if let Some(id) = hardware_id {
                self.name = id.to_string();
            }
        }
        self.hardware_id = hardware_id;
        self.reset_correction();
    }
    /// moving to another address invalidates the initialization
    pub(crate) fn set_slot_address(&mut self, address: Option<u8>) {
        if address != self.slot_address || address.is_none() {
            self.initialized = false;
            self.reset_correction();
        }
        self.slot_address = address;
    }
    pub(crate) fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }
    pub(crate) fn reset_correction(&mut self) {
        self.pick_correction = Location::ORIGIN;
    }

    /// start a new feed: turn the accumulated Y correction into a feed distance nudge
    pub(crate) fn begin_feed(&mut self) -> FeedNudge {
        self.visions_since_feed = 0;
        let error = self.pick_correction.y;
        if error.abs() < FEED_TICK
            {return FeedNudge::default()}

        let mut ticks = -(error / FEED_TICK) as i32;
        let offset = Location::new(0., f64::from(ticks) * FEED_TICK, 0., 0.);
        if self.slot_address.is_some_and(|address| address > FRONT_ROW_END) {
            ticks = -ticks;
        }
        debug!("{}: nudging tape by {} ticks", self.name(), ticks);
        self.pick_correction = self.pick_correction + offset;
        FeedNudge {ticks, offset}
    }
    /// a feed failed, give back the correction its nudge consumed
    pub(crate) fn revert_nudge(&mut self, nudge: FeedNudge) {
        self.pick_correction = self.pick_correction - nudge.offset;
    }
}
