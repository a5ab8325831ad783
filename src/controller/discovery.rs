use log::*;

use crate::{
    bus::Transport,
    error::Error,
    packet::{Command, HardwareId, Payload, Response, MAX_ADDRESS},
    registry::FeederId,
    };
use super::Controller;


/// report of one scanned address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScanProgress {
    pub address: u8,
    /// feeder which answered at this address
    pub found: Option<HardwareId>,
    /// share of the address range scanned so far, from 0 to 100
    pub percent: u8,
}

impl<T: Transport> Controller<T> {
    /**
        query every address from 1 to `max_feeder_address` and reconcile the registry with the answers

        - a feeder answering is moved to that address, and created if its hardware id was never seen. It then needs an initialization.
        - a feeder believed to be at an address where nobody answered loses its address

        `progress` is called after each address. Returns the feeders created by the scan.
    */
    pub async fn find_all_feeders(&self, mut progress: impl FnMut(ScanProgress)) -> Result<Vec<FeederId>, Error> {
        // the broadcast address is never scanned, even with unvalidated settings
        let last = self.settings.max_feeder_address.min(MAX_ADDRESS);
        info!("searching feeders on addresses 1 to {}", last);
        let mut created = Vec::new();
        for address in 1 ..= last {
            let found = match self.bus.request(&Command::get_feeder_id(address)).await? {
                Response::Ok {payload: Payload::HardwareId(hardware_id), ..} => {
                    if let Some(id) = self.adopt(address, hardware_id)? {
                        created.push(id);
                    }
                    Some(hardware_id)
                },
                response => {
                    if !matches!(response, Response::Timeout) {
                        debug!("unusable answer at address {}: {:?}", address, response);
                    }
                    self.vacate(address)?;
                    None
                },
            };
            progress(ScanProgress {address, found, percent: percent(address, last)});
        }
        info!("feeder search done, {} new feeders", created.len());
        Ok(created)
    }

    /// place the answering feeder at its address, returning it if it was just created
    fn adopt(&self, address: u8, hardware_id: HardwareId) -> Result<Option<FeederId>, Error> {
        let (id, created) = self.registry.resolve(hardware_id, true)?;
        self.registry.assign_address(id, address)?;
        if created {
            info!("new feeder {} at address {}", hardware_id, address);
        }
        else {
            debug!("feeder {} at address {}", hardware_id, address);
        }
        Ok(created.then_some(id))
    }

    fn vacate(&self, address: u8) -> Result<(), Error> {
        if let Some(id) = self.registry.find_by_slot_address(address) {
            debug!("no feeder answered at address {} anymore", address);
            self.registry.clear_address(id)?;
        }
        Ok(())
    }
}

fn percent(address: u8, last: u8) -> u8 {
    (u16::from(address) * 100 / u16::from(last)) as u8
}
