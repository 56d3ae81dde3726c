use grobro2ha::{Command, DeviceConfig};
use serde_json::{Map, Value};

/// Topics shared with the process that decodes the Growatt device traffic.
///
/// States arrive on `<prefix>/<device_id>/state`, device metadata on
/// `<prefix>/<device_id>/config` and reported command values on
/// `<prefix>/<device_id>/<command_name>/get`. Commands from Home Assistant
/// are handed back on `<prefix>/<device_id>/command`.
#[derive(Clone, Debug)]
pub struct IngestTopics {
    prefix: String,
}

#[derive(Debug, PartialEq)]
pub enum IngestMessage {
    State {
        device_id: String,
        state: Map<String, Value>,
    },
    Config(DeviceConfig),
    CommandState {
        device_id: String,
        command_name: String,
        value: String,
    },
}

impl IngestTopics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn subscriptions(&self) -> [String; 3] {
        let prefix = &self.prefix;
        [
            format!("{prefix}/+/state"),
            format!("{prefix}/+/config"),
            format!("{prefix}/+/+/get"),
        ]
    }

    pub fn command(&self, command: &Command) -> String {
        format!("{}/{}/command", self.prefix, command.device_id())
    }

    /// `None` if the topic is not an ingest topic. Malformed payloads are errors.
    pub fn parse(&self, topic: &str, payload: &[u8]) -> Option<anyhow::Result<IngestMessage>> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        let message = match parts[..] {
            [device_id, "state"] if !device_id.is_empty() => serde_json::from_slice(payload)
                .map(|state| IngestMessage::State {
                    device_id: device_id.to_string(),
                    state,
                })
                .map_err(anyhow::Error::from),
            [device_id, "config"] if !device_id.is_empty() => {
                serde_json::from_slice::<DeviceConfig>(payload)
                    .map_err(anyhow::Error::from)
                    .and_then(|config| {
                        if config.device_id == device_id {
                            Ok(IngestMessage::Config(config))
                        } else {
                            Err(anyhow::anyhow!(
                                "config for {} published on topic of {device_id}",
                                config.device_id
                            ))
                        }
                    })
            }
            [device_id, command_name, "get"] if !device_id.is_empty() => {
                Ok(IngestMessage::CommandState {
                    device_id: device_id.to_string(),
                    command_name: command_name.to_string(),
                    value: String::from_utf8_lossy(payload).trim().to_string(),
                })
            }
            _ => return None,
        };
        Some(message)
    }
}
