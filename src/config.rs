/*!
    settings of the feeder subsystem and the state it persists across restarts

    Only slot locations and the configuration of each feeder are persisted. Bus addresses and initialization are volatile: after a restart every feeder has to be rediscovered.
*/

use std::{fs, path::Path, time::Duration};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Error},
    feeder::{Feeder, DEFAULT_PART_PITCH},
    location::Location,
    packet::{HardwareId, MAX_ADDRESS},
    registry::Registry,
    slots::{Slot, SlotStore, Slots},
    };


#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// highest address scanned when searching feeders
    pub max_feeder_address: u8,
    /// extra rounds of discovery and initialization before giving up on a feeder
    pub feeder_communication_max_retry: u32,
    /// maximum wait for each reply, in milliseconds
    pub timeout_ms: u64,
    /// delay before each feed status request, in milliseconds
    pub feed_poll_interval_ms: u64,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            max_feeder_address: 50,
            feeder_communication_max_retry: 3,
            timeout_ms: 100,
            feed_poll_interval_ms: 50,
        }
    }
}
impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1 ..= MAX_ADDRESS).contains(&self.max_feeder_address)
            {return Err(ConfigError::Invalid("max_feeder_address must be between 1 and 254"))}
        if self.timeout_ms == 0
            {return Err(ConfigError::Invalid("timeout_ms must not be zero"))}
        Ok(())
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed_poll_interval_ms)
    }
}


/// persisted part of a [Feeder]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeederConfig {
    #[serde(default)]
    pub hardware_id: Option<HardwareId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub part: Option<String>,
    #[serde(default = "default_part_pitch")]
    pub part_pitch: u8,
    #[serde(default)]
    pub offset: Option<Location>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}
fn default_part_pitch() -> u8 {DEFAULT_PART_PITCH}
fn default_enabled() -> bool {true}

impl From<&Feeder> for FeederConfig {
    fn from(feeder: &Feeder) -> Self {
        Self {
            hardware_id: feeder.hardware_id(),
            name: feeder.label().to_owned(),
            part: feeder.part().map(str::to_owned),
            part_pitch: feeder.part_pitch(),
            offset: feeder.offset(),
            enabled: feeder.is_enabled(),
        }
    }
}
impl FeederConfig {
    /// fresh feeder with this configuration, not yet discovered
    pub fn to_feeder(&self) -> Feeder {
        let mut feeder = Feeder::new();
        feeder.set_name(&self.name);
        feeder.set_hardware_id(self.hardware_id);
        feeder.set_part(self.part.clone());
        feeder.set_part_pitch(self.part_pitch);
        feeder.set_offset(self.offset);
        feeder.set_enabled(self.enabled);
        feeder
    }
}


/// everything the feeder subsystem stores in the machine configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub slots: Vec<Slot>,
    #[serde(default)]
    pub feeders: Vec<FeederConfig>,
}

impl MachineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.settings.validate()?;
        Ok(config)
    }
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// configuration reflecting the current state of a machine
    pub fn capture(settings: &Settings, registry: &Registry, slots: &dyn SlotStore) -> Self {
        Self {
            settings: settings.clone(),
            slots: slots.slots(),
            feeders: registry.feeders().iter()
                .map(|(_, feeder)| FeederConfig::from(feeder))
                .collect(),
        }
    }
    /// registry holding the configured feeders, none of them discovered yet
    pub fn registry(&self) -> Result<Registry, Error> {
        let registry = Registry::new();
        for feeder in &self.feeders {
            registry.register(feeder.to_feeder())?;
        }
        Ok(registry)
    }
    pub fn slot_store(&self) -> Slots {
        self.slots.iter().copied().collect()
    }
}
