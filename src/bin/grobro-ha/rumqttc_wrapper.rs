use std::thread::{self, ThreadId};
use std::time::Duration;

use grobro2ha::{
    mqtt_config::MqttConfig,
    mqtt_wrapper::{self},
};
use log::warn;
use rumqttc::{
    tokio_rustls::{self, rustls::ClientConfig},
    Client, Connection, MqttOptions, Transport,
};

pub struct RumqttcWrapper {
    client: Client,
    event_loop: ThreadId,
}

fn match_qos(qos: mqtt_wrapper::QoS) -> rumqttc::QoS {
    match qos {
        mqtt_wrapper::QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        mqtt_wrapper::QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        mqtt_wrapper::QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

impl RumqttcWrapper {
    /// Create the client. The returned connection has to be iterated on the
    /// calling thread for any traffic to flow; incoming publishes show up there.
    pub fn connect(config: &MqttConfig, suffix: &str) -> (Self, Connection) {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| "grobro-ha".to_string() + suffix);
        let mut mqttoptions = MqttOptions::new(client_id, &config.host, config.port());
        mqttoptions.set_keep_alive(Duration::from_secs(60));
        if config.use_tls() {
            // Use rustls-native-certs to load root certificates from the operating system.
            let mut roots = tokio_rustls::rustls::RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                warn!("could not load platform cert: {e}");
            }
            for cert in native.certs {
                if let Err(e) = roots.add(cert) {
                    warn!("ignoring platform cert: {e}");
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();

            mqttoptions.set_transport(Transport::tls_with_config(client_config.into()));
        }

        //parse the mqtt authentication options
        if let Some((username, password)) = match (&config.username, &config.password) {
            (None, None) => None,
            (None, Some(_)) => None,
            (Some(username), None) => Some((username.clone(), "".into())),
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
        } {
            mqttoptions.set_credentials(username, password);
        }

        Self::with_capacity(mqttoptions, 512)
    }

    fn with_capacity(options: MqttOptions, cap: usize) -> (Self, Connection) {
        let (client, connection) = Client::new(options, cap);
        let wrapper = Self {
            client,
            event_loop: thread::current().id(),
        };
        (wrapper, connection)
    }
}

impl mqtt_wrapper::MqttWrapper for RumqttcWrapper {
    fn subscribe(&self, topic: &str, qos: mqtt_wrapper::QoS) -> anyhow::Result<()> {
        // the request queue is drained by the thread calling this, so never block on it
        Ok(self.client.try_subscribe(topic, match_qos(qos))?)
    }

    fn publish<S, V>(
        &self,
        topic: S,
        qos: mqtt_wrapper::QoS,
        retain: bool,
        payload: V,
    ) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        // The request queue is only drained by the event loop thread. Waiting
        // there for room would stall it for nothing, so fail at once.
        let attempts = if thread::current().id() == self.event_loop {
            1
        } else {
            3
        };
        for _ in 1..attempts {
            if self
                .client
                .try_publish(topic.clone(), match_qos(qos), retain, payload.clone())
                .is_ok()
            {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        Ok(self
            .client
            .try_publish(topic, match_qos(qos), retain, payload)?)
    }
}
