/*!
    feeder state machine on top of the [Bus]

    A feeder goes through these states, see [FeederState](crate::feeder::FeederState):

    ```text
    Unconfigured -> AddressUnknown -> Uninitialized -> Ready
    ```

    Any communication failure sends it back to `AddressUnknown` or `Uninitialized`. The [Controller] brings feeders back to `Ready` on demand, with a bounded number of attempts, and keeps the [Registry] consistent with what the bus reports.

    - methods here handle addressing and initialization of one feeder
    - feed motions are in [feeding]
    - the scan of the whole bus is in [discovery]
*/

/// scan of the whole address range
mod discovery;
/// tape motions and pick corrections
mod feeding;

pub use discovery::ScanProgress;

use std::sync::Arc;
use log::*;

use crate::{
    bus::{Bus, Transport},
    config::{MachineConfig, Settings},
    error::Error,
    location::Location,
    packet::{Command, HardwareId, Payload, Response, MAX_ADDRESS},
    registry::{FeederId, Registry},
    slots::{SlotStore, Slots},
    };


/// drives all feeders of one bus
pub struct Controller<T> {
    bus: Bus<T>,
    registry: Arc<Registry>,
    slots: Arc<dyn SlotStore>,
    settings: Settings,
}

impl<T: Transport> Controller<T> {
    /// controller with no feeder known yet and no slot location
    pub fn new(transport: T, settings: Settings) -> Self {
        Self::with_parts(transport, settings, Arc::new(Registry::new()), Arc::new(Slots::new()))
    }
    /// controller sharing a registry and slot store with the rest of the machine
    pub fn with_parts(transport: T, settings: Settings, registry: Arc<Registry>, slots: Arc<dyn SlotStore>) -> Self {
        Self {
            bus: Bus::new(transport, settings.timeout()),
            registry,
            slots,
            settings,
        }
    }
    /// controller restoring the feeders and slots of a saved configuration
    pub fn from_config(transport: T, config: &MachineConfig) -> Result<Self, Error> {
        config.settings.validate()?;
        Ok(Self::with_parts(
            transport,
            config.settings.clone(),
            Arc::new(config.registry()?),
            Arc::new(config.slot_store()),
            ))
    }
    /// configuration to persist for the current state
    pub fn snapshot(&self) -> MachineConfig {
        MachineConfig::capture(&self.settings, &self.registry, &*self.slots)
    }

    pub fn registry(&self) -> &Arc<Registry> {&self.registry}
    pub fn slots(&self) -> &Arc<dyn SlotStore> {&self.slots}
    pub fn settings(&self) -> &Settings {&self.settings}
    pub fn bus(&self) -> &Bus<T> {&self.bus}

    fn hardware_id(&self, id: FeederId) -> Result<HardwareId, Error> {
        self.registry.get(id)?.hardware_id().ok_or(Error::Unconfigured)
    }

    /// where the next part of a feeder should be picked
    pub fn pick_location(&self, id: FeederId) -> Result<Location, Error> {
        self.registry.get(id)?.pick_location(&*self.slots)
    }

    /**
        ask the bus which address the feeder answers on

        on success the feeder takes that address, evicting any other feeder believed to be there, and needs an initialization. When nobody answers, the feeder's address is forgotten.
    */
    pub async fn find_slot_address(&self, id: FeederId) -> Result<Option<u8>, Error> {
        let hardware_id = self.hardware_id(id)?;
        match self.bus.request(&Command::get_feeder_address(hardware_id)).await? {
            Response::Ok {address, payload: Payload::HardwareId(answered)}
            if answered == hardware_id && is_slot(address) => {
                self.registry.assign_address(id, address)?;
                debug!("feeder {} found at address {}", hardware_id, address);
                Ok(Some(address))
            },
            response => {
                match response {
                    Response::Timeout | Response::Corrupt(_) =>
                        debug!("feeder {} did not answer to its hardware id", hardware_id),
                    response =>
                        warn!("feeder {} gave unexpected answer to address lookup {:?}", hardware_id, response),
                }
                self.registry.clear_address(id)?;
                Ok(None)
            },
        }
    }

    /// send the initialization handshake if the feeder has an address but is not initialized
    async fn initialize_if_needed(&self, id: FeederId, hardware_id: HardwareId) -> Result<(), Error> {
        let feeder = self.registry.get(id)?;
        let Some(address) = feeder.slot_address()
            else {return Ok(())};
        if feeder.is_initialized()
            {return Ok(())}

        match self.bus.request(&Command::initialize_feeder(address, hardware_id)).await? {
            Response::Ok {..} => {
                self.registry.set_initialized(id, true)?;
                debug!("feeder {} initialized at address {}", hardware_id, address);
            },
            Response::WrongFeederUuid {address: observed, hardware_id: other} => {
                debug!("address {} is occupied by feeder {} instead of {}", observed, other, hardware_id);
                self.relocate(observed, other)?;
                self.registry.clear_address(id)?;
            },
            response => {
                match response {
                    Response::Timeout | Response::Corrupt(_) =>
                        debug!("feeder {} did not initialize at address {}", hardware_id, address),
                    response =>
                        warn!("feeder {} gave unexpected answer to initialization {:?}", hardware_id, response),
                }
                self.registry.clear_address(id)?;
            },
        }
        Ok(())
    }

    /// record that the feeder with the given hardware id sits at an address, creating it if never seen
    fn relocate(&self, address: u8, hardware_id: HardwareId) -> Result<FeederId, Error> {
        let (other, created) = self.registry.resolve(hardware_id, false)?;
        if created {
            info!("new feeder {} found at address {}", hardware_id, address);
        }
        if is_slot(address) {
            self.registry.assign_address(other, address)?;
        }
        self.registry.set_initialized(other, false)?;
        Ok(other)
    }

    /**
        bring a feeder to the ready state, rediscovering its address as needed

        This is the retry policy of the controller: at most `feeder_communication_max_retry + 1` rounds, each round looking the address up if unknown and then initializing. Once exhausted, no more command is sent and [Error::ConnectionFailed] is returned.
    */
    pub(crate) async fn connect(&self, id: FeederId) -> Result<(), Error> {
        let hardware_id = self.hardware_id(id)?;
        let rounds = self.settings.feeder_communication_max_retry.saturating_add(1);
        for round in 1 ..= rounds {
            if self.registry.get(id)?.slot_address().is_none() {
                self.find_slot_address(id).await?;
            }
            self.initialize_if_needed(id, hardware_id).await?;
            if self.registry.get(id)?.is_initialized()
                {return Ok(())}
            debug!("feeder {} not ready after round {} of {}", hardware_id, round, rounds);
        }
        warn!("giving up on feeder {} after {} rounds", hardware_id, rounds);
        Err(Error::ConnectionFailed(hardware_id.to_string()))
    }

    /// make a feeder ready for a job: discovered, initialized, and with a known pick location
    pub async fn prepare_for_job(&self, id: FeederId) -> Result<(), Error> {
        self.connect(id).await?;
        self.registry.get(id)?.verify_location(&*self.slots)?;
        Ok(())
    }

    /// protocol version of a feeder's firmware
    pub async fn version(&self, id: FeederId) -> Result<u8, Error> {
        let feeder = self.registry.get(id)?;
        let address = match feeder.slot_address() {
            Some(address) => address,
            None => self.find_slot_address(id).await?
                .ok_or_else(|| Error::NoSlotAddress(feeder.describe()))?,
        };
        match self.bus.request(&Command::get_version(address)).await? {
            Response::Ok {payload: Payload::Version(version), ..} => Ok(version),
            response => Err(Error::UnexpectedResponse {address, response}),
        }
    }
}

/// whether an address can be occupied by a feeder
fn is_slot(address: u8) -> bool {
    (1 ..= MAX_ADDRESS).contains(&address)
}
