use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::Context;
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};

static NEO_STATES: &str = include_str!("catalog/growatt_neo_states.json");
static NEO_COMMANDS: &str = include_str!("catalog/growatt_neo_commands.json");
static NOAH_STATES: &str = include_str!("catalog/growatt_noah_states.json");
static NOAH_COMMANDS: &str = include_str!("catalog/growatt_noah_commands.json");

/// Device families known to the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceType {
    Neo,
    Noah,
}

impl DeviceType {
    pub const ALL: [DeviceType; 2] = [DeviceType::Neo, DeviceType::Noah];

    /// Infer the device family from the prefix of a Growatt serial number.
    pub fn from_device_id(device_id: &str) -> Option<Self> {
        if device_id.starts_with("QMN") {
            Some(DeviceType::Neo)
        } else if device_id.starts_with("0PVP") {
            Some(DeviceType::Noah)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Neo => "neo",
            DeviceType::Noah => "noah",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Home Assistant entity kind a command is exposed as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Number,
    Button,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Number, EntityKind::Button];

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "number" => Some(EntityKind::Number),
            "button" => Some(EntityKind::Button),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Number => "number",
            EntityKind::Button => "button",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state variable a device may report, and how to present it as a sensor.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct StateDescriptor {
    #[serde(skip)]
    pub variable_name: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub device_class: Option<String>,
    pub state_class: Option<String>,
    pub unit_of_measurement: Option<String>,
    pub icon: Option<String>,
}

/// A command a device accepts. `attributes` end up verbatim in the discovery payload.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandDescriptor {
    pub name: String,
    pub kind: EntityKind,
    pub attributes: Map<String, Value>,
}

impl CommandDescriptor {
    fn from_json(name: &str, value: Value) -> anyhow::Result<Self> {
        let Value::Object(mut attributes) = value else {
            anyhow::bail!("command '{name}' is not a JSON object");
        };
        let kind = attributes
            .remove("type")
            .with_context(|| format!("command '{name}' has no entity type"))?;
        let kind = EntityKind::deserialize(kind)
            .with_context(|| format!("command '{name}' has an unsupported entity type"))?;
        Ok(Self {
            name: name.to_string(),
            kind,
            attributes,
        })
    }
}

/// Read-only lookup tables of known states and commands per device type.
#[derive(Debug, Default)]
pub struct Catalog {
    states: HashMap<DeviceType, BTreeMap<String, StateDescriptor>>,
    commands: HashMap<DeviceType, BTreeMap<String, CommandDescriptor>>,
}

impl Catalog {
    /// The catalog shipped with the library.
    pub fn builtin() -> anyhow::Result<Self> {
        let mut catalog = Catalog::default();
        catalog
            .add_device_type(DeviceType::Neo, NEO_STATES, NEO_COMMANDS)
            .context("loading builtin neo catalog")?;
        catalog
            .add_device_type(DeviceType::Noah, NOAH_STATES, NOAH_COMMANDS)
            .context("loading builtin noah catalog")?;
        Ok(catalog)
    }

    pub fn add_device_type(
        &mut self,
        device_type: DeviceType,
        states_json: &str,
        commands_json: &str,
    ) -> anyhow::Result<()> {
        let raw_states: BTreeMap<String, StateDescriptor> =
            serde_json::from_str(states_json).context("unparsable state definitions")?;
        let states: BTreeMap<String, StateDescriptor> = raw_states
            .into_iter()
            .map(|(variable_name, mut state)| {
                if variable_name.contains(char::is_whitespace) {
                    warn!("State '{variable_name}' of {device_type} contains illegal whitespace");
                }
                state.variable_name = variable_name.clone();
                (variable_name, state)
            })
            .collect();

        let raw_commands: BTreeMap<String, Value> =
            serde_json::from_str(commands_json).context("unparsable command definitions")?;
        let mut commands = BTreeMap::new();
        for (name, value) in raw_commands {
            let command = CommandDescriptor::from_json(&name, value)?;
            commands.insert(name, command);
        }

        // states and commands share one discovery namespace per device
        if let Some(name) = commands.keys().find(|name| states.contains_key(*name)) {
            anyhow::bail!("'{name}' of {device_type} is defined as both a state and a command");
        }

        self.states.insert(device_type, states);
        self.commands.insert(device_type, commands);
        Ok(())
    }

    pub fn knows(&self, device_type: DeviceType) -> bool {
        self.states.contains_key(&device_type)
    }

    pub fn state(&self, device_type: DeviceType, variable_name: &str) -> Option<&StateDescriptor> {
        self.states.get(&device_type)?.get(variable_name)
    }

    pub fn command(&self, device_type: DeviceType, command_name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(&device_type)?.get(command_name)
    }

    /// States of a device type, ordered by variable name.
    pub fn states(&self, device_type: DeviceType) -> impl Iterator<Item = &StateDescriptor> {
        self.states
            .get(&device_type)
            .into_iter()
            .flat_map(|states| states.values())
    }

    /// Commands of a device type, ordered by name.
    pub fn commands(&self, device_type: DeviceType) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands
            .get(&device_type)
            .into_iter()
            .flat_map(|commands| commands.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_device_type_from_prefix() {
        assert_eq!(DeviceType::from_device_id("QMN123"), Some(DeviceType::Neo));
        assert_eq!(DeviceType::from_device_id("0PVP456"), Some(DeviceType::Noah));
        assert_eq!(DeviceType::from_device_id("XYZ789"), None);
        assert_eq!(DeviceType::from_device_id("qmn123"), None);
    }

    #[test]
    fn builtin_catalog_loads() {
        let catalog = Catalog::builtin().unwrap();
        let power = catalog.state(DeviceType::Neo, "power").unwrap();
        assert_eq!(power.variable_name, "power");
        assert_eq!(power.unit_of_measurement.as_deref(), Some("W"));

        let limit = catalog
            .command(DeviceType::Neo, "output_power_limit")
            .unwrap();
        assert_eq!(limit.kind, EntityKind::Number);
        assert!(!limit.attributes.contains_key("type"));
        assert_eq!(limit.attributes["max"], 100);

        assert_eq!(catalog.commands(DeviceType::Noah).count(), 1);
    }

    #[test]
    fn builtin_names_are_unique_per_device_type() {
        let catalog = Catalog::builtin().unwrap();
        for device_type in DeviceType::ALL {
            for command in catalog.commands(device_type) {
                assert!(catalog.state(device_type, &command.name).is_none());
            }
        }
    }

    #[test]
    fn rejects_state_named_like_a_command() {
        let mut catalog = Catalog::default();
        let result = catalog.add_device_type(
            DeviceType::Noah,
            r#"{"smart_power": {"name": "Smart Power"}}"#,
            r#"{"smart_power": {"type": "button", "name": "Smart Power"}}"#,
        );
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("smart_power"), "{message}");
        assert!(!catalog.knows(DeviceType::Noah));
    }

    #[test]
    fn whitespace_in_variable_name_is_kept() {
        let mut catalog = Catalog::default();
        catalog
            .add_device_type(DeviceType::Neo, r#"{"bad name": {"name": "Bad"}}"#, "{}")
            .unwrap();
        assert!(catalog.state(DeviceType::Neo, "bad name").is_some());
    }

    #[test]
    fn rejects_command_without_type() {
        let mut catalog = Catalog::default();
        let result = catalog.add_device_type(DeviceType::Neo, "{}", r#"{"reboot": {"name": "Reboot"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unknown_entity_kind() {
        let mut catalog = Catalog::default();
        let result = catalog.add_device_type(
            DeviceType::Neo,
            "{}",
            r#"{"mode": {"type": "select", "name": "Mode"}}"#,
        );
        assert!(result.is_err());
    }
}
