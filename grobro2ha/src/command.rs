use std::collections::HashSet;

use log::{debug, warn};
use serde::Serialize;

use crate::catalog::EntityKind;
use crate::error::BridgeError;
use crate::topics::Topics;

/// A command from Home Assistant, decoded and addressed to one device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetOutputPowerLimit { device_id: String, value: u8 },
    ReadOutputPowerLimit { device_id: String },
    SmartPowerToggle { device_id: String },
}

impl Command {
    pub fn device_id(&self) -> &str {
        match self {
            Command::SetOutputPowerLimit { device_id, .. }
            | Command::ReadOutputPowerLimit { device_id }
            | Command::SmartPowerToggle { device_id } => device_id,
        }
    }
}

/// Recognizes and decodes the commands of one device family.
pub trait CommandMatcher: Send + Sync {
    /// Short name used in logs.
    fn family(&self) -> &str;

    /// The `(command_name, kind)` pairs this matcher accepts.
    fn commands(&self) -> Vec<(&str, EntityKind)>;

    fn matches(&self, command_name: &str, kind: EntityKind) -> bool {
        self.commands()
            .iter()
            .any(|&(name, k)| name == command_name && k == kind)
    }

    fn decode(
        &self,
        device_id: &str,
        command_name: &str,
        payload: &[u8],
    ) -> Result<Command, BridgeError>;
}

/// Commands of NEO micro-inverters.
pub struct NeoCommands;

impl NeoCommands {
    pub const OUTPUT_POWER_LIMIT: &'static str = "output_power_limit";
    pub const READ_OUTPUT_POWER_LIMIT: &'static str = "read_output_power_limit";
}

impl CommandMatcher for NeoCommands {
    fn family(&self) -> &str {
        "neo"
    }

    fn commands(&self) -> Vec<(&str, EntityKind)> {
        vec![
            (Self::OUTPUT_POWER_LIMIT, EntityKind::Number),
            (Self::READ_OUTPUT_POWER_LIMIT, EntityKind::Button),
        ]
    }

    fn decode(
        &self,
        device_id: &str,
        command_name: &str,
        payload: &[u8],
    ) -> Result<Command, BridgeError> {
        let device_id = device_id.to_string();
        match command_name {
            Self::OUTPUT_POWER_LIMIT => Ok(Command::SetOutputPowerLimit {
                device_id,
                value: parse_percent(command_name, payload)?,
            }),
            Self::READ_OUTPUT_POWER_LIMIT => Ok(Command::ReadOutputPowerLimit { device_id }),
            _ => Err(BridgeError::UnknownCommand(command_name.to_string())),
        }
    }
}

/// Commands of NOAH batteries.
pub struct NoahCommands;

impl NoahCommands {
    pub const SMART_POWER: &'static str = "smart_power";
}

impl CommandMatcher for NoahCommands {
    fn family(&self) -> &str {
        "noah"
    }

    fn commands(&self) -> Vec<(&str, EntityKind)> {
        vec![(Self::SMART_POWER, EntityKind::Button)]
    }

    fn decode(
        &self,
        device_id: &str,
        command_name: &str,
        _payload: &[u8],
    ) -> Result<Command, BridgeError> {
        match command_name {
            Self::SMART_POWER => Ok(Command::SmartPowerToggle {
                device_id: device_id.to_string(),
            }),
            _ => Err(BridgeError::UnknownCommand(command_name.to_string())),
        }
    }
}

// Home Assistant number entities may send "50" as well as "50.0".
fn parse_percent(command: &str, payload: &[u8]) -> Result<u8, BridgeError> {
    let invalid = |reason: String| BridgeError::InvalidPayload {
        command: command.to_string(),
        reason,
    };
    let text = std::str::from_utf8(payload).map_err(|e| invalid(e.to_string()))?;
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| invalid(format!("'{text}' is not a number")))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(invalid(format!("{value} is out of range 0..=100")));
    }
    Ok(value.round() as u8)
}

/// Maps set topics from Home Assistant to typed commands.
///
/// Matchers are asked in order and the first one accepting a command wins.
pub struct CommandRouter {
    topics: Topics,
    matchers: Vec<Box<dyn CommandMatcher>>,
}

impl CommandRouter {
    pub fn new(topics: Topics, matchers: Vec<Box<dyn CommandMatcher>>) -> Self {
        Self { topics, matchers }
    }

    /// Router for all device families this library supports.
    pub fn growatt(topics: Topics) -> Self {
        Self::new(topics, vec![Box::new(NoahCommands), Box::new(NeoCommands)])
    }

    /// Fails if two matchers claim the same command.
    pub fn ensure_disjoint(&self) -> Result<(), BridgeError> {
        let mut seen = HashSet::new();
        for matcher in &self.matchers {
            for (name, kind) in matcher.commands() {
                if !seen.insert((name.to_string(), kind)) {
                    return Err(BridgeError::OverlappingCommand {
                        command: name.to_string(),
                        kind: kind.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn route(&self, topic: &str, payload: &[u8]) -> Option<Command> {
        let Some(parsed) = self.topics.parse_command(topic) else {
            debug!("{topic} is not a command topic");
            return None;
        };
        debug!(
            "received {} command {} for device {}",
            parsed.kind, parsed.command_name, parsed.device_id
        );

        let matcher = self
            .matchers
            .iter()
            .find(|matcher| matcher.matches(parsed.command_name, parsed.kind))?;
        match matcher.decode(parsed.device_id, parsed.command_name, payload) {
            Ok(command) => Some(command),
            Err(e) => {
                warn!("{} command rejected: {e}", matcher.family());
                None
            }
        }
    }
}
