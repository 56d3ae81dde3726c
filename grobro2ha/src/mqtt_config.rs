use serde_derive::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub tls: Option<bool>,
}

impl MqttConfig {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some_and(|tls| tls)
    }

    /// Port to connect to, falling back to the protocol default.
    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| if self.use_tls() { 8883 } else { 1883 })
    }
}
