use thiserror::Error;

use crate::{
    packet::{DecodeError, HardwareId, InvalidHardwareId, Response},
    registry::FeederId,
    };


/// error raised to callers of the feeder controller
#[derive(Error, Debug)]
pub enum Error {
    #[error("feeder {0} has no slot address, is it inserted?")]
    NoSlotAddress(String),
    #[error("the slot at address {0} has no location configured")]
    UnconfiguredSlot(u8),
    #[error("feeder {0} has no location offset")]
    NoLocationOffset(String),
    #[error("feeder has no hardware id")]
    Unconfigured,
    #[error("no feeder {0:?} in registry")]
    UnknownFeeder(FeederId),
    #[error("a feeder with hardware id {0} is already registered")]
    DuplicateHardwareId(HardwareId),
    #[error("failed to find and initialize the feeder {0}")]
    ConnectionFailed(String),
    #[error("feed failed: {0}")]
    FeedFailure(#[source] FeedFailure),
    #[error("feeder at address {address} gave unexpected reply {response:?}")]
    UnexpectedResponse { address: u8, response: Response },
    #[error("feed distance of {0} tenths of millimeter cannot be sent to a feeder")]
    FeedDistance(i32),
    #[error("problem with the bus transport")]
    Bus(#[from] std::io::Error),
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    HardwareId(#[from] InvalidHardwareId),
}

/// reason of a failed feed
#[derive(Error, Debug)]
pub enum FeedFailure {
    #[error("feed command timed out")]
    Timeout,
    #[error("feed command got a corrupt reply")]
    Corrupt(#[source] DecodeError),
    #[error("feeder could not reach its destination")]
    CouldNotReachTarget,
    #[error("feeder timed out when we requested a feed status update")]
    StatusTimeout,
    #[error("feeder is still uninitialized after recovery")]
    Uninitialized,
    #[error("feeder could not be brought back")]
    Connection(#[source] Box<Error>),
    #[error("unexpected reply {0:?}")]
    Unexpected(Response),
}

/// problem loading or validating a machine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot access configuration file")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration file")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(&'static str),
}
