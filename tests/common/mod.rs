#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    io,
    sync::{Arc, Mutex},
    time::Duration,
    };

use smartfeeder::{
    bus::Transport,
    config::Settings,
    feeder::Feeder,
    location::Location,
    packet::{Command, HardwareId, Payload, Response},
    registry::FeederId,
    slots::SlotStore,
    Controller,
    };


/// run an async test on a fresh runtime, with logs and a global timeout
pub fn test<F: Future>(test: F) -> F::Output {
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .build()
    .expect("failed to create runtime")
    .block_on(async move {
        tokio::time::timeout(Duration::from_secs(10), test)
        .await.expect("aborted test because took too long")
    })
}

pub fn settings() -> Settings {
    Settings {
        max_feeder_address: 5,
        feeder_communication_max_retry: 3,
        timeout_ms: 100,
        feed_poll_interval_ms: 0,
    }
}

pub fn hardware_id(text: &str) -> HardwareId {
    text.parse().expect("bad hardware id in test")
}


#[derive(Default)]
struct Script {
    /// reply to every occurrence of a command, `None` for no reply
    always: HashMap<String, Option<String>>,
    /// replies consumed one by one, before `always`
    once: HashMap<String, VecDeque<Option<String>>>,
    /// unscripted commands get no reply instead of failing
    silent: bool,
    sent: Vec<String>,
}

/**
    fake bus replying to commands as scripted by the test

    commands nobody scripted a reply for fail the transport, so unexpected traffic shows up as an error
*/
#[derive(Clone, Default)]
pub struct ScriptedBus {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self::default()
    }
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script poisoned")
    }
    fn encode(response: Response) -> Option<String> {
        match response {
            Response::Timeout => None,
            response => Some(response.to_hex().expect("response cannot be encoded")),
        }
    }

    /// always reply this response to the command, replacing any previous script for it
    pub fn reply(&self, command: &Command, response: Response) -> &Self {
        let encoded = Self::encode(response);
        self.script().always.insert(command.to_hex(), encoded);
        self
    }
    /// reply raw text to the command
    pub fn reply_raw(&self, command: &Command, reply: &str) -> &Self {
        self.script().always.insert(command.to_hex(), Some(reply.to_owned()));
        self
    }
    /// reply raw text to the next occurrence of the command only
    pub fn reply_raw_once(&self, command: &Command, reply: &str) -> &Self {
        self.script().once.entry(command.to_hex()).or_default().push_back(Some(reply.to_owned()));
        self
    }
    /// reply this response to the next occurrence of the command only
    pub fn reply_once(&self, command: &Command, response: Response) -> &Self {
        let encoded = Self::encode(response);
        self.script().once.entry(command.to_hex()).or_default().push_back(encoded);
        self
    }
    /// never reply to the command
    pub fn timeout(&self, command: &Command) -> &Self {
        self.reply(command, Response::Timeout)
    }
    /// let every unscripted command time out
    pub fn silent(&self) -> &Self {
        self.script().silent = true;
        self
    }

    /// every command sent so far, in order
    pub fn sent(&self) -> Vec<String> {
        self.script().sent.clone()
    }
    /// number of times a command was sent
    pub fn count(&self, command: &Command) -> usize {
        let encoded = command.to_hex();
        self.script().sent.iter().filter(|&sent| *sent == encoded).count()
    }
    /// position of the first occurrence of a command in the history
    pub fn position(&self, command: &Command) -> Option<usize> {
        let encoded = command.to_hex();
        self.script().sent.iter().position(|sent| *sent == encoded)
    }
    pub fn clear_history(&self) {
        self.script().sent.clear();
    }
}

impl Transport for ScriptedBus {
    async fn send(&mut self, command: &str) -> io::Result<Option<String>> {
        let mut script = self.script();
        script.sent.push(command.to_owned());
        if let Some(reply) = script.once.get_mut(command).and_then(VecDeque::pop_front) {
            return Ok(reply);
        }
        match script.always.get(command) {
            Some(reply) => Ok(reply.clone()),
            None if script.silent => Ok(None),
            None => Err(io::Error::other(format!("no reply scripted for {}", command))),
        }
    }
}


/// a successful reply carrying no data
pub fn done(address: u8) -> Response {
    Response::Ok {address, payload: Payload::Done}
}
/// a successful reply carrying a hardware id
pub fn identity(address: u8, hardware_id: HardwareId) -> Response {
    Response::Ok {address, payload: Payload::HardwareId(hardware_id)}
}
/// a successful reply to a feed motion
pub fn feeding(address: u8) -> Response {
    Response::Ok {address, payload: Payload::Feeding {expected: Some(Duration::from_millis(40))}}
}

pub fn controller() -> (Controller<ScriptedBus>, ScriptedBus) {
    let bus = ScriptedBus::new();
    (Controller::new(bus.clone(), settings()), bus)
}

/// register a feeder with an offset, and give its slot a location
pub fn configured_feeder(controller: &Controller<ScriptedBus>, hardware_id: HardwareId, address: u8) -> FeederId {
    controller.slots().set_location(address, Some(Location::new(1., 2., 3., 0.)));
    let mut feeder = Feeder::with_hardware_id(hardware_id);
    feeder.set_offset(Some(Location::new(1., 1., 0., 45.)));
    controller.registry().register(feeder).expect("cannot register feeder")
}

/// script a feeder answering at its address and accepting initialization
pub fn reachable(bus: &ScriptedBus, hardware_id: HardwareId, address: u8) {
    bus.reply(&Command::get_feeder_address(hardware_id), identity(address, hardware_id));
    bus.reply(&Command::initialize_feeder(address, hardware_id), done(address));
}
