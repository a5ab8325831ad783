use std::{io, path::Path};
use log::*;
use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::Transport;


/// gcode asking the motion controller to forward a packet on the feeder bus
const FORWARD: &str = "M485";
/// line prefix of the controller's report of a bus reply
const REPLY: &str = "rs485-reply:";
/// reported by the controller when no feeder answered
const NO_REPLY: &str = "TIMEOUT";

/**
    transport through a motion controller bridging its serial port to the RS-485 feeder bus

    each packet is sent as `M485 <HEX>` and the controller reports the feeder's reply as a line `rs485-reply: <HEX>`. Other controller output is ignored.
*/
pub struct GcodeTransport {
    /// buffered across exchanges, a read may bring more than one line
    port: BufReader<SerialPort>,
}

impl GcodeTransport {
    /// open the controller's serial port with the given baud rate
    pub fn open(path: impl AsRef<Path>, rate: u32) -> Result<Self, io::Error> {
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(rate)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::One);
                settings.set_parity(Parity::None);
                Ok(settings)
                })?;
        Ok(Self {
            port: BufReader::new(port),
        })
    }

    async fn read_line(&mut self) -> Result<String, io::Error> {
        let mut line = String::new();
        if self.port.read_line(&mut line).await? == 0
            {return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed"))}
        Ok(line.trim().to_owned())
    }
}

impl Transport for GcodeTransport {
    async fn send(&mut self, command: &str) -> io::Result<Option<String>> {
        // leftovers belong to an exchange that already timed out
        let stale = self.port.buffer().len();
        self.port.consume(stale);
        self.port.get_mut().write_all(format!("{} {}\n", FORWARD, command).as_bytes()).await?;
        loop {
            let line = self.read_line().await?;
            match line.strip_prefix(REPLY) {
                Some(reply) if reply.trim() == NO_REPLY => return Ok(None),
                Some(reply) => return Ok(Some(reply.trim().to_owned())),
                None => trace!("ignoring controller output {:?}", line),
            }
        }
    }
}
