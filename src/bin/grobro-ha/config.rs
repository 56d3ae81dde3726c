use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use grobro2ha::home_assistant::{BridgeConfig, DEFAULT_BASE_TOPIC};
use grobro2ha::mqtt_config::MqttConfig;
use log::{info, warn};
use serde_derive::Deserialize;

const DEFAULT_INGEST_TOPIC: &str = "grobro";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    pub home_assistant: Option<MqttConfig>,
    pub base_topic: Option<String>,
    /// Seconds without state before a device is marked offline, 0 disables it.
    pub device_timeout: Option<u64>,
    pub config_dir: Option<String>,
    pub ingest_topic: Option<String>,
}

impl Config {
    pub fn is_valid(&self) -> bool {
        self.home_assistant.as_ref().is_some_and(|x| x.is_valid())
    }

    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            base_topic: self
                .base_topic
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_TOPIC.to_string()),
            device_timeout: self
                .device_timeout
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(self.config_dir.as_deref().unwrap_or("."))
    }

    pub fn ingest_topic(&self) -> &str {
        self.ingest_topic.as_deref().unwrap_or(DEFAULT_INGEST_TOPIC)
    }

    /// Read `config.toml` from the working directory, or next to the
    /// executable, then apply environment overrides.
    pub fn load() -> Config {
        let mut config = match find_config_file() {
            Some(path) => {
                info!("loading configuration from {}", path.display());
                match fs::read_to_string(&path) {
                    Ok(contents) => Config::parse(&contents),
                    Err(e) => {
                        warn!("Could not read {}: {e}", path.display());
                        Config::default()
                    }
                }
            }
            None => {
                info!("no config.toml found, using environment only");
                Config::default()
            }
        };
        config.apply_env(|name| env::var(name).ok());
        config
    }

    pub fn parse(contents: &str) -> Config {
        match toml::from_str::<Config>(contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("toml config unparsable: {e}");
                Config::default()
            }
        }
    }

    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        // $MQTT_BROKER_HOST
        if let Some(host) = var("MQTT_BROKER_HOST") {
            self.mqtt().host = host;
        }
        // $MQTT_PORT (optional)
        if let Some(port) = var("MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt().port = Some(port),
                Err(e) => warn!("ignoring MQTT_PORT '{port}': {e}"),
            }
        }
        // $MQTT_USERNAME (optional)
        if let Some(username) = var("MQTT_USERNAME") {
            self.mqtt().username = Some(username);
        }
        // $MQTT_PASSWORD (optional)
        if let Some(password) = var("MQTT_PASSWORD") {
            self.mqtt().password = Some(password);
        }
        // $MQTT_TLS (optional)
        if let Some(tls) = var("MQTT_TLS") {
            self.mqtt().tls = Some(matches!(tls.as_str(), "1" | "true" | "yes"));
        }
        if let Some(base_topic) = var("HA_BASE_TOPIC") {
            self.base_topic = Some(base_topic);
        }
        if let Some(timeout) = var("DEVICE_TIMEOUT") {
            match timeout.parse() {
                Ok(timeout) => self.device_timeout = Some(timeout),
                Err(e) => warn!("ignoring DEVICE_TIMEOUT '{timeout}': {e}"),
            }
        }
        if let Some(dir) = var("GROBRO_CONFIG_DIR") {
            self.config_dir = Some(dir);
        }
        if let Some(topic) = var("GROBRO_INGEST_TOPIC") {
            self.ingest_topic = Some(topic);
        }
    }

    fn mqtt(&mut self) -> &mut MqttConfig {
        self.home_assistant.get_or_insert_with(MqttConfig::default)
    }
}

fn find_config_file() -> Option<PathBuf> {
    let cwd = env::current_dir().ok().map(|dir| dir.join("config.toml"));
    let exe = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("config.toml")));
    [cwd, exe].into_iter().flatten().find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn parses_toml() {
        let config = Config::parse(
            r#"
            base_topic = "ha"
            device_timeout = 300
            config_dir = "/data"

            [home_assistant]
            host = "broker.local"
            port = 8883
            tls = true
            "#,
        );
        assert!(config.is_valid());
        let bridge = config.bridge();
        assert_eq!(bridge.base_topic, "ha");
        assert_eq!(bridge.device_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.config_dir(), PathBuf::from("/data"));
        assert_eq!(config.ingest_topic(), "grobro");
        assert!(config.home_assistant.unwrap().use_tls());
    }

    #[test]
    fn defaults_disable_timeout() {
        let config = Config::parse("device_timeout = 0");
        assert!(!config.is_valid());
        assert_eq!(config.bridge().base_topic, "homeassistant");
        assert_eq!(config.bridge().device_timeout, None);
        assert_eq!(config.config_dir(), PathBuf::from("."));
    }

    #[test]
    fn broken_toml_falls_back_to_default() {
        let config = Config::parse("home_assistant = [");
        assert!(config.home_assistant.is_none());
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MQTT_BROKER_HOST", "mqtt.example"),
            ("MQTT_PORT", "not-a-port"),
            ("MQTT_USERNAME", "grobro"),
            ("HA_BASE_TOPIC", "hass"),
            ("DEVICE_TIMEOUT", "60"),
            ("GROBRO_INGEST_TOPIC", "growatt"),
        ]);
        let mut config = Config::parse("[home_assistant]\nhost = \"file\"\nport = 1884");
        config.apply_env(|name| env.get(name).map(|value| value.to_string()));

        let mqtt = config.home_assistant.clone().unwrap();
        assert_eq!(mqtt.host, "mqtt.example");
        assert_eq!(mqtt.port, Some(1884));
        assert_eq!(mqtt.username.as_deref(), Some("grobro"));
        assert_eq!(config.bridge().base_topic, "hass");
        assert_eq!(config.bridge().device_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.ingest_topic(), "growatt");
    }
}
