use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::catalog::{CommandDescriptor, StateDescriptor};
use crate::device_config::DeviceConfig;
use crate::topics::Topics;

/// Remembers which entities were already announced to Home Assistant, per device.
///
/// State variables and commands share one namespace per device.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    announced: Mutex<HashMap<String, HashSet<String>>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_announced(&self, device_id: &str, entity_name: &str) -> bool {
        self.lock()
            .get(device_id)
            .is_some_and(|names| names.contains(entity_name))
    }

    /// Returns `true` if the entity was not marked before.
    pub fn mark_announced(&self, device_id: &str, entity_name: &str) -> bool {
        self.lock()
            .entry(device_id.to_string())
            .or_default()
            .insert(entity_name.to_string())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.announced
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `DeviceInfo` groups the entities of one device in Home Assistant.
///
/// More information about the MQTT discovery protocol can be found here:
/// https://www.home-assistant.io/integrations/mqtt/#mqtt-discovery
#[derive(Clone, Debug, Serialize)]
pub struct DeviceInfo {
    identifiers: Vec<String>,
    name: String,
    manufacturer: String,
    serial_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hw_version: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    connections: Vec<(String, String)>,
}

impl DeviceInfo {
    pub fn new(config: &DeviceConfig) -> Self {
        let device_id = &config.device_id;
        Self {
            identifiers: vec![device_id.clone()],
            name: format!("Growatt {device_id}"),
            manufacturer: "Growatt".to_string(),
            serial_number: device_id.clone(),
            model: config.model().map(str::to_string),
            sw_version: config.sw_version.clone(),
            hw_version: config.hw_version.clone(),
            connections: config
                .mac_address
                .iter()
                .map(|mac| ("mac".to_string(), mac.clone()))
                .collect(),
        }
    }
}

/// Discovery payload of a sensor entity backed by one state variable.
#[derive(Debug, Serialize)]
pub struct SensorConfig {
    name: String,
    state_topic: String,
    availability_topic: String,
    value_template: String, // extracts the variable from the state JSON
    unique_id: String,
    object_id: String,
    device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

impl SensorConfig {
    pub fn new(topics: &Topics, config: &DeviceConfig, state: &StateDescriptor) -> Self {
        let device_id = &config.device_id;
        let variable = &state.variable_name;
        Self {
            name: state.display_name.clone(),
            state_topic: topics.state(device_id),
            availability_topic: topics.availability(device_id),
            value_template: format!("{{{{ value_json['{variable}'] }}}}"),
            unique_id: format!("grobro_{device_id}_{variable}"),
            object_id: format!("{device_id}_{variable}"),
            device: DeviceInfo::new(config),
            device_class: state.device_class.clone(),
            state_class: state.state_class.clone(),
            unit_of_measurement: state.unit_of_measurement.clone(),
            icon: state.icon.clone(),
        }
    }
}

/// Discovery payload of a command entity. Catalog attributes win over the
/// generated fields.
pub fn command_config(topics: &Topics, device_id: &str, command: &CommandDescriptor) -> Value {
    let name = &command.name;
    let mut payload = Map::new();
    payload.insert(
        "command_topic".into(),
        topics.command_set(command.kind, device_id, name).into(),
    );
    payload.insert(
        "state_topic".into(),
        topics.command_get(command.kind, device_id, name).into(),
    );
    payload.insert("unique_id".into(), format!("grobro_{device_id}_cmd_{name}").into());
    payload.insert("object_id".into(), format!("{device_id}_cmd_{name}").into());
    payload.insert(
        "device".into(),
        serde_json::json!({ "identifiers": [device_id] }),
    );
    for (key, value) in &command.attributes {
        payload.insert(key.clone(), value.clone());
    }
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, DeviceType};

    #[test]
    fn marks_each_entity_once() {
        let cache = DiscoveryCache::new();
        assert!(!cache.has_announced("QMN001", "power"));
        assert!(cache.mark_announced("QMN001", "power"));
        assert!(!cache.mark_announced("QMN001", "power"));
        assert!(cache.has_announced("QMN001", "power"));
        assert!(!cache.has_announced("QMN002", "power"));
        assert!(!cache.has_announced("QMN001", "energy_total"));
    }

    #[test]
    fn sensor_payload_contains_device_info() {
        let catalog = Catalog::builtin().unwrap();
        let state = catalog.state(DeviceType::Neo, "power").unwrap();
        let mut config = DeviceConfig::minimal("QMN001");
        config.device_type = Some("55".into());
        config.sw_version = Some("1.0".into());
        config.mac_address = Some("aa:bb".into());

        let payload =
            serde_json::to_value(SensorConfig::new(&Topics::new("homeassistant"), &config, state))
                .unwrap();
        assert_eq!(payload["state_topic"], "homeassistant/grobro/QMN001/state");
        assert_eq!(
            payload["availability_topic"],
            "homeassistant/grobro/QMN001/availability"
        );
        assert_eq!(payload["value_template"], "{{ value_json['power'] }}");
        assert_eq!(payload["unique_id"], "grobro_QMN001_power");
        assert_eq!(payload["object_id"], "QMN001_power");
        assert_eq!(payload["device"]["name"], "Growatt QMN001");
        assert_eq!(payload["device"]["model"], "NEO-series");
        assert_eq!(payload["device"]["sw_version"], "1.0");
        assert_eq!(payload["device"]["connections"][0][0], "mac");
        assert_eq!(payload["device"]["connections"][0][1], "aa:bb");
        assert!(payload["device"].get("hw_version").is_none());
        assert_eq!(payload["unit_of_measurement"], "W");
    }

    #[test]
    fn command_payload_merges_attributes() {
        let catalog = Catalog::builtin().unwrap();
        let command = catalog
            .command(DeviceType::Neo, "output_power_limit")
            .unwrap();
        let payload = command_config(&Topics::new("ha"), "QMN001", command);
        assert_eq!(
            payload["command_topic"],
            "ha/number/grobro/QMN001/output_power_limit/set"
        );
        assert_eq!(
            payload["state_topic"],
            "ha/number/grobro/QMN001/output_power_limit/get"
        );
        assert_eq!(payload["unique_id"], "grobro_QMN001_cmd_output_power_limit");
        assert_eq!(payload["object_id"], "QMN001_cmd_output_power_limit");
        assert_eq!(payload["device"]["identifiers"][0], "QMN001");
        assert_eq!(payload["name"], "Output Power Limit");
        assert_eq!(payload["max"], 100);
    }
}
