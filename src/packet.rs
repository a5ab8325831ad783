/*!
    wire format of the feeder bus

    every packet starts with its destination and the length of what follows, all integers big endian:

    ```text
    command:   ADDRESS (1) | LENGTH (1) | OPCODE (1) | PAYLOAD | CRC (2)
    response:  HOST (1)    | LENGTH (1) | FROM (1)   | STATUS (1) | DATA | CRC (2)
    ```

    - `ADDRESS` is the destination slot of a command, responses always go to [HOST]
    - `LENGTH` counts the bytes between itself and the checksum
    - `FROM` is the slot of the responding feeder
    - `CRC` is CRC-16/MODBUS of all preceding bytes, transmitted low byte first

    Responses do not echo the opcode, the shape of their data depends on the command they answer. Packets travel on the transport as upper case hex strings.
*/

use core::{fmt, str::FromStr, time::Duration};
use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pack_enum;


/// address of the controller, destination of every response
pub const HOST: u8 = 0x00;
/// address every feeder listens to, only used for commands selecting a feeder by hardware id
pub const BROADCAST: u8 = 0xFF;
/// highest address a feeder can occupy
pub const MAX_ADDRESS: u8 = 0xFE;

/// size of destination, length, responder and status
const REPLY_HEADER: usize = <ReplyHeader as FromBytes>::Bytes::SIZE;
/// size of the trailing checksum
const CHECKSUM: usize = 2;

const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// integrity checksum of a packet, excluding the checksum itself
pub fn checksum(data: &[u8]) -> u16 {
    CRC.checksum(data)
}


/// immutable identifier burned in each feeder at manufacture
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId([u8; HardwareId::SIZE]);

impl HardwareId {
    pub const SIZE: usize = 12;

    pub const fn new(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }
    pub const fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }
    fn from_slice(data: &[u8]) -> Option<Self> {
        Some(Self(data.try_into().ok()?))
    }
}
impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}
impl fmt::Debug for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareId({})", self)
    }
}
impl FromStr for HardwareId {
    type Err = InvalidHardwareId;
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; Self::SIZE];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|_| InvalidHardwareId(text.to_owned()))?;
        Ok(Self(bytes))
    }
}
impl TryFrom<String> for HardwareId {
    type Error = InvalidHardwareId;
    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}
impl From<HardwareId> for String {
    fn from(id: HardwareId) -> Self {
        id.to_string()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid hardware id {0:?}, expected 24 hex characters")]
pub struct InvalidHardwareId(pub String);


/// operation requested by a command
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// ask the feeder at an address for its hardware id
    GetFeederId = 0x01,
    /// handshake enabling feed commands on a feeder
    InitializeFeeder = 0x02,
    /// firmware protocol version
    GetVersion = 0x03,
    MoveFeedForward = 0x04,
    MoveFeedBackward = 0x05,
    /// whether the last feed motion reached its target
    MoveFeedStatus = 0x06,
    /// broadcast: the feeder owning a hardware id answers from its address
    GetFeederAddress = 0xC0,
    #[fallback]
    Unknown = 0xFF,
}
pack_enum!(Opcode);

/// outcome carried by every response, right after the responder
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Eq)]
pub enum Status {
    Success = 0x00,
    /// the address answered, but as a different feeder than the one named in the command
    WrongFeederUuid = 0x01,
    /// the motor did not reach the requested position
    CouldNotReachTarget = 0x02,
    /// the feeder expects an initialization before accepting this command
    UninitializedFeeder = 0x03,
    #[fallback]
    Unknown = 0xFF,
}
pack_enum!(Status);

#[derive(Copy, Clone, FromBytes, ToBytes, Debug)]
struct Header {
    address: u8,
    /// size of opcode and payload
    length: u8,
    opcode: Opcode,
}

#[derive(Copy, Clone, FromBytes, ToBytes, Debug)]
struct ReplyHeader {
    destination: u8,
    /// size of responder, status and data
    length: u8,
    responder: u8,
    status: Status,
}

/// data of the ok answer to a feed motion, older firmwares send none
#[derive(Copy, Clone, FromBytes, ToBytes, Debug)]
struct FeedReply {
    /// time the feeder expects the motion to take, in milliseconds
    expected_time: u16,
}


/// payload of a command, no command carries more than a hardware id
pub type CommandPayload = heapless::Vec<u8, { HardwareId::SIZE }>;

/// command sent by the controller to one feeder, or to all of them
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub address: u8,
    pub opcode: Opcode,
    pub payload: CommandPayload,
}
impl Command {
    fn new(address: u8, opcode: Opcode, payload: &[u8]) -> Self {
        Self {
            address,
            opcode,
            payload: payload.iter().copied().collect(),
        }
    }
    pub fn get_feeder_id(address: u8) -> Self {
        Self::new(address, Opcode::GetFeederId, &[])
    }
    pub fn get_feeder_address(hardware_id: HardwareId) -> Self {
        Self::new(BROADCAST, Opcode::GetFeederAddress, hardware_id.as_bytes())
    }
    pub fn initialize_feeder(address: u8, hardware_id: HardwareId) -> Self {
        Self::new(address, Opcode::InitializeFeeder, hardware_id.as_bytes())
    }
    pub fn get_version(address: u8) -> Self {
        Self::new(address, Opcode::GetVersion, &[])
    }
    /// `distance` in tenths of millimeter
    pub fn move_feed_forward(address: u8, distance: u8) -> Self {
        Self::new(address, Opcode::MoveFeedForward, &[distance])
    }
    /// `distance` in tenths of millimeter
    pub fn move_feed_backward(address: u8, distance: u8) -> Self {
        Self::new(address, Opcode::MoveFeedBackward, &[distance])
    }
    pub fn move_feed_status(address: u8) -> Self {
        Self::new(address, Opcode::MoveFeedStatus, &[])
    }

    /// binary packet, checksum included
    pub fn to_bytes(&self) -> Vec<u8> {
        frame(self.address, self.opcode, &self.payload)
    }
    /// packet as sent on the transport
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.to_bytes())
    }
}

fn frame(address: u8, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let header = Header {
        address,
        // payloads are bounded by the callers to fit a packet
        length: (1 + payload.len()) as u8,
        opcode,
    };
    seal(header.to_be_bytes().into_iter().chain(payload.iter().copied()).collect())
}

fn reply_frame(responder: u8, status: Status, data: &[u8]) -> Vec<u8> {
    let header = ReplyHeader {
        destination: HOST,
        // data is at most a hardware id
        length: (2 + data.len()) as u8,
        responder,
        status,
    };
    seal(header.to_be_bytes().into_iter().chain(data.iter().copied()).collect())
}

/// append the checksum
fn seal(mut packet: Vec<u8>) -> Vec<u8> {
    let crc = checksum(&packet);
    packet.extend_from_slice(&crc.to_le_bytes());
    packet
}


/// reason why a reply could not be understood
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("reply is not valid hex")]
    Hex,
    #[error("reply is truncated to {0} bytes")]
    Truncated(usize),
    #[error("length field announces {expected} bytes but {actual} were received")]
    Length { expected: usize, actual: usize },
    #[error("checksum mismatch, computed {computed:#06X} but received {received:#06X}")]
    Checksum { computed: u16, received: u16 },
    #[error("reply is addressed to {0} instead of the host")]
    Destination(u8),
    #[error("unknown status byte {0:#04X}")]
    Status(u8),
    #[error("unexpected {size} data bytes with status {status:?}")]
    Data { status: Status, size: usize },
}

/// typed data of a successful reply, depending on the command's opcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// answer to [Opcode::GetFeederId] and [Opcode::GetFeederAddress]
    HardwareId(HardwareId),
    /// answer to [Opcode::GetVersion]
    Version(u8),
    /// answer to feed motions, with the motion duration when the firmware reports it
    Feeding { expected: Option<Duration> },
    /// answer to [Opcode::InitializeFeeder] and [Opcode::MoveFeedStatus]
    Done,
}

/// every outcome of sending a command, decoded once at the bus boundary
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ok { address: u8, payload: Payload },
    WrongFeederUuid { address: u8, hardware_id: HardwareId },
    UninitializedFeeder { address: u8, hardware_id: HardwareId },
    CouldNotReachTarget { address: u8 },
    /// no reply arrived in time
    Timeout,
    /// a reply arrived but failed framing or integrity checks
    Corrupt(DecodeError),
}

impl Response {
    /// decode a hex reply to a command with the given opcode, never fails: bad replies become [Response::Corrupt]
    pub fn decode(expected: Opcode, reply: &str) -> Self {
        let parsed = hex::decode(reply.trim())
            .map_err(|_| DecodeError::Hex)
            .and_then(|bytes| Self::from_bytes(expected, &bytes));
        match parsed {
            Ok(response) => response,
            Err(error) => Self::Corrupt(error),
        }
    }

    /// decode a binary reply to a command with the given opcode
    pub fn from_bytes(expected: Opcode, bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < REPLY_HEADER + CHECKSUM
            {return Err(DecodeError::Truncated(bytes.len()))}
        let header = ReplyHeader::from_be_bytes(bytes[.. REPLY_HEADER].try_into()
            .map_err(|_| DecodeError::Truncated(bytes.len()))?);
        let announced = 2 + usize::from(header.length) + CHECKSUM;
        if announced != bytes.len() {
            return Err(DecodeError::Length {expected: announced, actual: bytes.len()});
        }
        let (body, crc) = bytes.split_at(bytes.len() - CHECKSUM);
        let received = u16::from_le_bytes([crc[0], crc[1]]);
        let computed = checksum(body);
        if received != computed {
            return Err(DecodeError::Checksum {computed, received});
        }
        if header.destination != HOST {
            return Err(DecodeError::Destination(header.destination));
        }

        let address = header.responder;
        let status = header.status;
        let data = &body[REPLY_HEADER ..];
        let unexpected = || DecodeError::Data {status, size: data.len()};
        match status {
            Status::Success => Ok(Self::Ok {
                address,
                payload: Payload::decode(expected, data).ok_or_else(unexpected)?,
                }),
            Status::WrongFeederUuid => Ok(Self::WrongFeederUuid {
                address,
                hardware_id: HardwareId::from_slice(data).ok_or_else(unexpected)?,
                }),
            Status::UninitializedFeeder => Ok(Self::UninitializedFeeder {
                address,
                hardware_id: HardwareId::from_slice(data).ok_or_else(unexpected)?,
                }),
            Status::CouldNotReachTarget => {
                if !data.is_empty()
                    {return Err(unexpected())}
                Ok(Self::CouldNotReachTarget {address})
            },
            Status::Unknown => Err(DecodeError::Status(body[REPLY_HEADER - 1])),
        }
    }

    /// binary reply a feeder would send for this response
    ///
    /// `None` for outcomes that are not packets: [Response::Timeout] and [Response::Corrupt]
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        let packet = match *self {
            Self::Ok {address, payload} => match payload {
                Payload::HardwareId(id) => reply_frame(address, Status::Success, id.as_bytes()),
                Payload::Version(version) => reply_frame(address, Status::Success, &[version]),
                Payload::Feeding {expected: Some(expected)} => {
                    let expected_time = u16::try_from(expected.as_millis()).unwrap_or(u16::MAX);
                    reply_frame(address, Status::Success, &FeedReply {expected_time}.to_be_bytes())
                },
                Payload::Feeding {expected: None} | Payload::Done =>
                    reply_frame(address, Status::Success, &[]),
                },
            Self::WrongFeederUuid {address, hardware_id} =>
                reply_frame(address, Status::WrongFeederUuid, hardware_id.as_bytes()),
            Self::UninitializedFeeder {address, hardware_id} =>
                reply_frame(address, Status::UninitializedFeeder, hardware_id.as_bytes()),
            Self::CouldNotReachTarget {address} =>
                reply_frame(address, Status::CouldNotReachTarget, &[]),
            Self::Timeout | Self::Corrupt(_) => return None,
        };
        Some(packet)
    }
    /// hex reply a feeder would send, see [Self::to_bytes]
    pub fn to_hex(&self) -> Option<String> {
        self.to_bytes().map(hex::encode_upper)
    }
}

impl Payload {
    fn decode(opcode: Opcode, data: &[u8]) -> Option<Self> {
        match opcode {
            Opcode::GetFeederId | Opcode::GetFeederAddress =>
                HardwareId::from_slice(data).map(Self::HardwareId),
            Opcode::GetVersion => match data {
                &[version] => Some(Self::Version(version)),
                _ => None,
                },
            Opcode::MoveFeedForward | Opcode::MoveFeedBackward => match data {
                [] => Some(Self::Feeding {expected: None}),
                _ => {
                    let reply = FeedReply::from_be_bytes(data.try_into().ok()?);
                    Some(Self::Feeding {expected: Some(Duration::from_millis(u64::from(reply.expected_time)))})
                },
                },
            Opcode::InitializeFeeder | Opcode::MoveFeedStatus =>
                data.is_empty().then_some(Self::Done),
            Opcode::Unknown => None,
        }
    }
}
