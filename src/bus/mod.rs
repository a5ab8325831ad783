/*!
    request/response exchanges on the shared feeder bus

    The bus is half duplex and shared by all feeders: [Bus] makes sure a single command is in flight at any time, every caller waits for the previous exchange (or its timeout) to complete before sending.

    The physical link is abstracted by [Transport], which only moves hex strings.
*/

/// serial link through a gcode motion controller
#[cfg(feature = "serial")]
mod gcode;

#[cfg(feature = "serial")]
pub use gcode::GcodeTransport;

use core::future::Future;
use std::time::Duration;
use log::*;
use tokio::sync::Mutex;

use crate::packet::{Command, Response};


/**
    link carrying encoded packets to the feeders and bringing their replies back

    `send` resolves to `Ok(None)` when no reply came. An `Err` is a failure of the link itself and is not retried.
*/
pub trait Transport: Send {
    fn send(&mut self, command: &str) -> impl Future<Output = std::io::Result<Option<String>>> + Send;
}

/// feeder bus over some transport
pub struct Bus<T> {
    transport: Mutex<T>,
    /// maximum time waited for each reply
    timeout: Duration,
}

impl<T: Transport> Bus<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport: Mutex::new(transport),
            timeout,
        }
    }
    pub fn timeout(&self) -> Duration {self.timeout}

    /// send one command and decode its reply
    pub async fn request(&self, command: &Command) -> Result<Response, std::io::Error> {
        let encoded = command.to_hex();
        let reply = {
            let mut transport = self.transport.lock().await;
            tokio::time::timeout(self.timeout, transport.send(&encoded)).await
        };
        let response = match reply {
            Ok(Ok(Some(reply))) => {
                trace!("{} -> {}", encoded, reply);
                Response::decode(command.opcode, &reply)
            },
            Ok(Ok(None)) | Err(_) => {
                trace!("{} -> timeout", encoded);
                Response::Timeout
            },
            Ok(Err(error)) => {
                error!("transport failed sending {}: {}", encoded, error);
                return Err(error);
            },
        };
        if let Response::Corrupt(reason) = &response {
            warn!("corrupt reply to {:?} at address {}: {}", command.opcode, command.address, reason);
        }
        Ok(response)
    }
}
