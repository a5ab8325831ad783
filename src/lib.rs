/*!
    Controller for smart tape feeders of a pick-and-place machine.

    Feeders share a half duplex serial bus and are addressed by the slot they are inserted in. Each one carries a factory hardware id, the controller finds which slot every feeder sits in, initializes it, and drives its tape.

    - [packet] encodes commands and decodes responses
    - [bus] exchanges packets over a [Transport](bus::Transport)
    - [registry] and [slots] hold the machine's feeders and slot locations
    - [controller] brings feeders to the ready state, feeds them and scans the bus
*/

mod utils;

pub mod packet;
pub mod location;
pub mod feeder;
pub mod slots;
pub mod error;
pub mod registry;
pub mod bus;
pub mod config;
pub mod controller;

pub use error::{Error, FeedFailure};
pub use controller::{Controller, ScanProgress};
