use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::availability::AvailabilityTimers;
use crate::catalog::{Catalog, DeviceType, EntityKind, StateDescriptor};
use crate::command::{Command, CommandRouter};
use crate::device_config::{ConfigResolver, ConfigStore, DeviceConfig};
use crate::discovery::{command_config, DiscoveryCache, SensorConfig};
use crate::error::BridgeError;
use crate::mqtt_wrapper::{MqttWrapper, QoS};
use crate::topics::Topics;

pub const DEFAULT_BASE_TOPIC: &str = "homeassistant";

/// Settings of the Home Assistant side of the bridge.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub base_topic: String,
    /// Mark devices offline after this long without state. `None` disables it.
    pub device_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            device_timeout: None,
        }
    }
}

pub type CommandCallback = Box<dyn Fn(Command) + Send + Sync>;

/// Bridges device states into Home Assistant MQTT discovery and routes
/// Home Assistant commands back.
pub struct HomeAssistant<MQTT: MqttWrapper, S: ConfigStore> {
    client: Arc<MQTT>,
    topics: Topics,
    catalog: Catalog,
    configs: ConfigResolver<S>,
    discovery: DiscoveryCache,
    availability: AvailabilityTimers,
    router: CommandRouter,
    device_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    on_command: Option<CommandCallback>,
}

impl<MQTT: MqttWrapper, S: ConfigStore> HomeAssistant<MQTT, S> {
    pub fn new(
        client: Arc<MQTT>,
        store: S,
        catalog: Catalog,
        config: &BridgeConfig,
    ) -> Result<Self, BridgeError> {
        let topics = Topics::new(config.base_topic.clone());
        let router = CommandRouter::growatt(topics.clone());
        router.ensure_disjoint()?;

        let offline_client = Arc::clone(&client);
        let offline_topics = topics.clone();
        let availability = AvailabilityTimers::new(
            config.device_timeout,
            Arc::new(move |device_id: &str| {
                warn!("Device {device_id} timed out. Mark it as unavailable.");
                if let Err(e) =
                    publish_availability(offline_client.as_ref(), &offline_topics, device_id, false)
                {
                    error!("Could not mark {device_id} unavailable: {e:#}");
                }
            }),
        );

        Ok(Self {
            client,
            topics,
            catalog,
            configs: ConfigResolver::new(store),
            discovery: DiscoveryCache::new(),
            availability,
            router,
            device_locks: Mutex::new(HashMap::new()),
            on_command: None,
        })
    }

    /// Register the receiver of commands sent from Home Assistant.
    pub fn with_command_handler(mut self, on_command: CommandCallback) -> Self {
        self.on_command = Some(on_command);
        self
    }

    pub fn configs(&self) -> &ConfigResolver<S> {
        &self.configs
    }

    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    pub fn availability(&self) -> &AvailabilityTimers {
        &self.availability
    }

    /// Subscribe to the set topics of all command entities.
    pub fn subscribe(&self) -> anyhow::Result<()> {
        for kind in EntityKind::ALL {
            let topic = self.topics.command_subscription(kind);
            info!("Subscribing to {topic}");
            self.client
                .subscribe(&topic, QoS::AtMostOnce)
                .with_context(|| format!("subscribing to {topic}"))?;
        }
        Ok(())
    }

    /// Entry point for device states; failures are logged and the state dropped.
    pub fn on_device_state(&self, device_id: &str, state: &Map<String, Value>) {
        if let Err(e) = self.publish_state(device_id, state) {
            match e.downcast_ref::<BridgeError>() {
                Some(expected) => warn!("Dropping state of {device_id}: {expected}"),
                None => error!("Publish device state of {device_id}: {e:#}"),
            }
        }
    }

    /// Publish a device state and make sure Home Assistant knows the entities.
    pub fn publish_state(&self, device_id: &str, state: &Map<String, Value>) -> anyhow::Result<()> {
        // only devices of a known type get a lock entry
        let device_type = DeviceType::from_device_id(device_id);
        let lock = device_type.map(|_| self.device_lock(device_id));
        let _serialized = lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));

        self.publish_json(&self.topics.state(device_id), state, false)?;

        self.availability.reset(device_id);
        publish_availability(self.client.as_ref(), &self.topics, device_id, true)?;

        let device_type =
            device_type.ok_or_else(|| BridgeError::UnknownDeviceType(device_id.to_string()))?;
        if !self.catalog.knows(device_type) {
            return Err(BridgeError::MissingCatalog(device_type.to_string()).into());
        }

        for variable_name in state.keys() {
            match self.catalog.state(device_type, variable_name) {
                Some(descriptor) => self.announce_sensor(device_id, descriptor)?,
                None => warn!("Unknown {device_type} state '{variable_name}' from {device_id}"),
            }
        }

        self.announce_commands(device_id, device_type)
    }

    /// Entry point for messages on the subscribed command topics.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        match (self.router.route(topic, payload), &self.on_command) {
            (Some(command), Some(on_command)) => {
                debug!("forward command {command:?}");
                on_command(command);
            }
            (Some(command), None) => {
                warn!("No command handler registered, dropping {command:?}");
            }
            (None, _) => {
                warn!(
                    "received unknown command {topic}: {}",
                    String::from_utf8_lossy(payload)
                );
            }
        }
    }

    /// Store metadata a device reported about itself. Returns whether it changed.
    pub fn set_config(&self, config: DeviceConfig) -> bool {
        self.configs.update(config)
    }

    /// Publish a value a device reported for one of its commands, e.g. the
    /// output power limit currently in effect.
    pub fn publish_command_state(
        &self,
        device_id: &str,
        command_name: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        let device_type = DeviceType::from_device_id(device_id)
            .ok_or_else(|| BridgeError::UnknownDeviceType(device_id.to_string()))?;
        let command = self
            .catalog
            .command(device_type, command_name)
            .ok_or_else(|| BridgeError::UnknownCommand(command_name.to_string()))?;
        let topic = self.topics.command_get(command.kind, device_id, command_name);
        debug!("forward {command_name} of {device_id} to {topic}: {value}");
        self.client
            .publish(topic, QoS::AtMostOnce, false, value.as_bytes().to_vec())
    }

    fn announce_sensor(&self, device_id: &str, state: &StateDescriptor) -> anyhow::Result<()> {
        if self.discovery.has_announced(device_id, &state.variable_name) {
            return Ok(());
        }
        let config = self.configs.resolve(device_id);
        let topic = self.topics.sensor_config(device_id, &state.variable_name);
        let payload = SensorConfig::new(&self.topics, &config, state);
        self.publish_json(&topic, &payload, true)?;
        self.discovery.mark_announced(device_id, &state.variable_name);
        Ok(())
    }

    fn announce_commands(&self, device_id: &str, device_type: DeviceType) -> anyhow::Result<()> {
        for command in self.catalog.commands(device_type) {
            if self.discovery.has_announced(device_id, &command.name) {
                continue;
            }
            let payload = command_config(&self.topics, device_id, command);
            debug!("announce command {}: {payload}", command.name);
            let topic = self
                .topics
                .command_config(command.kind, device_id, &command.name);
            self.publish_json(&topic, &payload, true)?;
            self.discovery.mark_announced(device_id, &command.name);
        }
        Ok(())
    }

    fn publish_json<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        retain: bool,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_string(payload)?;
        debug!("Publishing to {topic} with payload {payload}");
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .with_context(|| format!("publishing to {topic}"))
    }

    /// Devices of a known type that reported a state, sorted.
    pub fn devices(&self) -> Vec<String> {
        let locks = self
            .device_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut devices: Vec<String> = locks.keys().cloned().collect();
        devices.sort();
        devices
    }

    fn device_lock(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .device_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(device_id.to_string()).or_default())
    }
}

fn publish_availability<MQTT: MqttWrapper>(
    client: &MQTT,
    topics: &Topics,
    device_id: &str,
    online: bool,
) -> anyhow::Result<()> {
    let payload = if online { "online" } else { "offline" };
    client
        .publish(topics.availability(device_id), QoS::AtMostOnce, false, payload)
        .with_context(|| format!("publishing availability of {device_id}"))
}
