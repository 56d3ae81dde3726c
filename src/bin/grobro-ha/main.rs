mod config;
mod ingest;
mod logging;
mod rumqttc_wrapper;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use config::Config;
use grobro2ha::mqtt_wrapper::{MqttWrapper, QoS};
use grobro2ha::{Catalog, Command, FileConfigStore, HomeAssistant};
use ingest::{IngestMessage, IngestTopics};
use log::{error, info, warn};
use rumqttc::{Event, Packet};
use rumqttc_wrapper::RumqttcWrapper;

type Bridge = HomeAssistant<RumqttcWrapper, FileConfigStore>;

fn main() -> anyhow::Result<()> {
    logging::init_logger();
    info!("Running revision: {}", env!("GIT_HASH"));
    if std::env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml in its path");
    }

    let config = Config::load();
    let Some(mqtt_config) = config.home_assistant.as_ref().filter(|_| config.is_valid()) else {
        bail!("no MQTT broker configured, set [home_assistant] host or $MQTT_BROKER_HOST");
    };
    let bridge_config = config.bridge();
    match bridge_config.device_timeout {
        Some(timeout) => info!("devices time out after {}s", timeout.as_secs()),
        None => info!("device timeout disabled"),
    }

    info!(
        "Connecting to MQTT broker at '{}:{}'",
        mqtt_config.host,
        mqtt_config.port()
    );
    let (client, mut connection) = RumqttcWrapper::connect(mqtt_config, "-ha");
    let client = Arc::new(client);

    let catalog = Catalog::builtin().context("loading device catalog")?;
    let ingest = IngestTopics::new(config.ingest_topic());
    let forward_client = Arc::clone(&client);
    let forward_topics = ingest.clone();
    let bridge: Bridge = HomeAssistant::new(
        Arc::clone(&client),
        FileConfigStore::new(config.config_dir()),
        catalog,
        &bridge_config,
    )?
    .with_command_handler(Box::new(move |command: Command| {
        forward_command(forward_client.as_ref(), &forward_topics, &command)
    }));
    bridge.configs().preload();

    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                // subscriptions do not survive a reconnect with a clean session
                if let Err(e) = subscribe(&bridge, client.as_ref(), &ingest) {
                    error!("{e:#}");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatch(&bridge, &ingest, &publish.topic, &publish.payload);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {e}");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
    Ok(())
}

fn subscribe(bridge: &Bridge, client: &RumqttcWrapper, ingest: &IngestTopics) -> anyhow::Result<()> {
    bridge.subscribe()?;
    for topic in ingest.subscriptions() {
        info!("Subscribing to {topic}");
        client
            .subscribe(&topic, QoS::AtMostOnce)
            .with_context(|| format!("subscribing to {topic}"))?;
    }
    Ok(())
}

fn dispatch(bridge: &Bridge, ingest: &IngestTopics, topic: &str, payload: &[u8]) {
    match ingest.parse(topic, payload) {
        Some(Ok(IngestMessage::State { device_id, state })) => {
            bridge.on_device_state(&device_id, &state);
        }
        Some(Ok(IngestMessage::Config(device_config))) => {
            bridge.set_config(device_config);
        }
        Some(Ok(IngestMessage::CommandState {
            device_id,
            command_name,
            value,
        })) => {
            if let Err(e) = bridge.publish_command_state(&device_id, &command_name, &value) {
                warn!("Dropping {command_name} value of {device_id}: {e:#}");
            }
        }
        Some(Err(e)) => warn!("Malformed message on {topic}: {e:#}"),
        None => bridge.on_message(topic, payload),
    }
}

fn forward_command(client: &RumqttcWrapper, ingest: &IngestTopics, command: &Command) {
    let topic = ingest.command(command);
    let payload = match serde_json::to_string(command) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Could not serialize {command:?}: {e}");
            return;
        }
    };
    info!("forward command to {topic}: {payload}");
    if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload) {
        error!("Failed to forward command: {e:#}");
    }
}
