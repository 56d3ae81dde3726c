use crate::catalog::EntityKind;

/// Builds and parses the Home Assistant side topics below a base prefix.
#[derive(Clone, Debug)]
pub struct Topics {
    base: String,
}

/// A command topic taken apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTopic<'a> {
    pub kind: EntityKind,
    pub device_id: &'a str,
    pub command_name: &'a str,
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn state(&self, device_id: &str) -> String {
        format!("{}/grobro/{device_id}/state", self.base)
    }

    pub fn availability(&self, device_id: &str) -> String {
        format!("{}/grobro/{device_id}/availability", self.base)
    }

    pub fn sensor_config(&self, device_id: &str, variable_name: &str) -> String {
        format!("{}/sensor/grobro/{device_id}_{variable_name}/config", self.base)
    }

    pub fn command_config(&self, kind: EntityKind, device_id: &str, command_name: &str) -> String {
        format!("{}/{kind}/grobro/{device_id}_{command_name}/config", self.base)
    }

    pub fn command_set(&self, kind: EntityKind, device_id: &str, command_name: &str) -> String {
        format!("{}/{kind}/grobro/{device_id}/{command_name}/set", self.base)
    }

    pub fn command_get(&self, kind: EntityKind, device_id: &str, command_name: &str) -> String {
        format!("{}/{kind}/grobro/{device_id}/{command_name}/get", self.base)
    }

    /// Wildcard subscription covering all set topics of one entity kind.
    pub fn command_subscription(&self, kind: EntityKind) -> String {
        format!("{}/{kind}/grobro/+/+/set", self.base)
    }

    /// Parses `<base>/<kind>/grobro/<device_id>/<command_name>/set`.
    pub fn parse_command<'a>(&self, topic: &'a str) -> Option<CommandTopic<'a>> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        let [kind, "grobro", device_id, command_name, "set"] = parts[..] else {
            return None;
        };
        if device_id.is_empty() || command_name.is_empty() {
            return None;
        }
        Some(CommandTopic {
            kind: EntityKind::parse(kind)?,
            device_id,
            command_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_topics() {
        let topics = Topics::new("homeassistant");
        assert_eq!(topics.state("QMN001"), "homeassistant/grobro/QMN001/state");
        assert_eq!(
            topics.sensor_config("QMN001", "power"),
            "homeassistant/sensor/grobro/QMN001_power/config"
        );
        assert_eq!(
            topics.command_config(EntityKind::Button, "0PVP1", "smart_power"),
            "homeassistant/button/grobro/0PVP1_smart_power/config"
        );
        assert_eq!(
            topics.command_subscription(EntityKind::Number),
            "homeassistant/number/grobro/+/+/set"
        );
    }

    #[test]
    fn parses_command_topics() {
        let topics = Topics::new("homeassistant");
        assert_eq!(
            topics.parse_command("homeassistant/number/grobro/QMN001/output_power_limit/set"),
            Some(CommandTopic {
                kind: EntityKind::Number,
                device_id: "QMN001",
                command_name: "output_power_limit",
            })
        );
        for topic in [
            "homeassistant/sensor/grobro/QMN001/output_power_limit/set",
            "homeassistant/number/grobro/QMN001/output_power_limit/get",
            "homeassistant/number/other/QMN001/output_power_limit/set",
            "homeassistant/number/grobro/QMN001/set",
            "homeassistantx/number/grobro/QMN001/output_power_limit/set",
            "other/number/grobro/QMN001/output_power_limit/set",
            "homeassistant/number/grobro//output_power_limit/set",
        ] {
            assert_eq!(topics.parse_command(topic), None, "{topic}");
        }
    }
}
