use std::time::Duration;
use log::*;

use crate::{
    bus::Transport,
    error::{Error, FeedFailure},
    feeder::{Feeder, FeedOptions},
    location::Location,
    packet::{Command, HardwareId, Payload, Response},
    registry::FeederId,
    };
use super::Controller;


/// status requests sent after a motion before considering it lost
const FEED_STATUS_POLLS: usize = 3;
/// tenths of millimeter per millimeter of tape
const TICKS_PER_MM: i32 = 10;

#[derive(Copy, Clone, Debug)]
enum Direction {
    Forward,
    Backward,
}
impl Direction {
    fn command(self, address: u8, distance: u8) -> Command {
        match self {
            Self::Forward => Command::move_feed_forward(address, distance),
            Self::Backward => Command::move_feed_backward(address, distance),
        }
    }
}

impl<T: Transport> Controller<T> {
    /**
        advance the tape of a feeder by one part

        The feeder is brought to the ready state first if needed. Missing slot location or offset are reported before anything moves.

        A feeder that lost its initialization (it rebooted, or another feeder took its place) is recovered and the feed retried, once. A feed command that gets no reply fails immediately: retrying blindly could advance the tape twice.
    */
    pub async fn feed(&self, id: FeederId) -> Result<(), Error> {
        let feeder = self.registry.get(id)?;
        match feeder.feed_options() {
            FeedOptions::Normal => {},
            FeedOptions::SkipNext => {
                debug!("{}: skipping feed, last part was put back", feeder.name());
                self.registry.update(id, |feeder| feeder.set_feed_options(FeedOptions::Normal))?;
                return Ok(());
            },
            FeedOptions::Disable => return Ok(()),
        }

        let nudge = self.registry.update(id, Feeder::begin_feed)?;
        let distance = i32::from(feeder.part_pitch()) * TICKS_PER_MM + nudge.ticks;
        let result = self.move_tape(id, Direction::Forward, distance).await;
        if result.is_err() {
            self.registry.update(id, |feeder| feeder.revert_nudge(nudge))?;
        }
        result
    }

    /// advance the tape by one millimeter, forgetting vision corrections
    pub async fn feed_one_mm(&self, id: FeederId) -> Result<(), Error> {
        self.move_tape(id, Direction::Forward, TICKS_PER_MM).await?;
        self.registry.update(id, Feeder::reset_correction)?;
        Ok(())
    }

    /// pull the tape back, `distance` in tenths of millimeter
    pub async fn move_backward(&self, id: FeederId, distance: u8) -> Result<(), Error> {
        self.move_tape(id, Direction::Backward, i32::from(distance)).await
    }

    /// a part was put back in the tape: do not advance on next feed. Returns whether it was accepted
    pub fn take_back_part(&self, id: FeederId) -> Result<bool, Error> {
        self.registry.update(id, |feeder| {
            if feeder.feed_options() != FeedOptions::Normal
                {return false}
            feeder.set_feed_options(FeedOptions::SkipNext);
            true
        })
    }

    /// report the pick error measured by bottom vision on the last part of a feeder
    pub fn apply_vision_correction(&self, id: FeederId, error: Location) -> Result<(), Error> {
        let slots = &*self.slots;
        self.registry.update(id, |feeder| feeder.apply_vision_correction(error, slots))?
    }

    async fn move_tape(&self, id: FeederId, direction: Direction, distance: i32) -> Result<(), Error> {
        let ticks = u8::try_from(distance)
            .map_err(|_| Error::FeedDistance(distance))?;
        let feeder = self.registry.get(id)?;
        let hardware_id = feeder.hardware_id().ok_or(Error::Unconfigured)?;
        self.check_feed_preconditions(&feeder)?;
        self.ensure_ready(id).await?;

        let mut recovered = false;
        loop {
            let feeder = self.registry.get(id)?;
            feeder.verify_location(&*self.slots)?;
            let address = feeder.slot_address()
                .ok_or_else(|| Error::NoSlotAddress(feeder.describe()))?;

            let response = self.bus.request(&direction.command(address, ticks)).await?;
            match response {
                Response::Ok {payload: Payload::Feeding {expected}, ..} => {
                    debug!("{}: moving {:?} by {} ticks", feeder.name(), direction, ticks);
                    return self.wait_for_motion(id, address, expected).await;
                },
                Response::Timeout => {
                    self.registry.clear_address(id)?;
                    return Err(Error::FeedFailure(FeedFailure::Timeout));
                },
                Response::Corrupt(reason) => {
                    self.registry.clear_address(id)?;
                    return Err(Error::FeedFailure(FeedFailure::Corrupt(reason)));
                },
                Response::UninitializedFeeder {..} | Response::WrongFeederUuid {..} if !recovered => {
                    debug!("{}: feeder lost its initialization, recovering", feeder.name());
                    recovered = true;
                    self.forget(id, hardware_id, &response)?;
                    self.ensure_ready(id).await?;
                },
                Response::UninitializedFeeder {..} => {
                    self.registry.set_initialized(id, false)?;
                    return Err(Error::FeedFailure(FeedFailure::Uninitialized));
                },
                Response::CouldNotReachTarget {..} =>
                    return Err(Error::FeedFailure(FeedFailure::CouldNotReachTarget)),
                response =>
                    return Err(Error::FeedFailure(FeedFailure::Unexpected(response))),
            }
        }
    }

    /// reject feeds that would move tape without knowing where to pick
    fn check_feed_preconditions(&self, feeder: &Feeder) -> Result<(), Error> {
        if let Some(address) = feeder.slot_address() {
            if self.slots.slot(address).location.is_none()
                {return Err(Error::UnconfiguredSlot(address))}
        }
        if feeder.offset().is_none()
            {return Err(Error::NoLocationOffset(feeder.describe()))}
        Ok(())
    }

    /// like [Self::connect], but exhausting the retries is a feed failure
    async fn ensure_ready(&self, id: FeederId) -> Result<(), Error> {
        self.connect(id).await.map_err(|error| match error {
            Error::ConnectionFailed(_) => Error::FeedFailure(FeedFailure::Connection(Box::new(error))),
            error => error,
        })
    }

    /// invalidate what the controller knows about a feeder after it refused a motion
    fn forget(&self, id: FeederId, hardware_id: HardwareId, response: &Response) -> Result<(), Error> {
        match *response {
            Response::UninitializedFeeder {hardware_id: answered, ..} if answered == hardware_id =>
                self.registry.set_initialized(id, false),
            Response::UninitializedFeeder {address, hardware_id: answered}
            | Response::WrongFeederUuid {address, hardware_id: answered} => {
                self.relocate(address, answered)?;
                self.registry.clear_address(id)
            },
            _ => self.registry.clear_address(id),
        }
    }

    /// poll the feeder until its motion is reported complete
    async fn wait_for_motion(&self, id: FeederId, address: u8, expected: Option<Duration>) -> Result<(), Error> {
        if let Some(expected) = expected
            {trace!("feeder at address {} expects its motion to take {:?}", address, expected)}
        for _ in 0 .. FEED_STATUS_POLLS {
            tokio::time::sleep(self.settings.feed_poll_interval()).await;
            match self.bus.request(&Command::move_feed_status(address)).await? {
                Response::Ok {..} => return Ok(()),
                Response::CouldNotReachTarget {..} =>
                    return Err(Error::FeedFailure(FeedFailure::CouldNotReachTarget)),
                Response::Timeout | Response::Corrupt(_) => continue,
                Response::UninitializedFeeder {..} => {
                    self.registry.set_initialized(id, false)?;
                    return Err(Error::FeedFailure(FeedFailure::Uninitialized));
                },
                response =>
                    return Err(Error::FeedFailure(FeedFailure::Unexpected(response))),
            }
        }
        Err(Error::FeedFailure(FeedFailure::StatusTimeout))
    }
}
