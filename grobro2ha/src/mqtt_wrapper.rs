#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

pub trait MqttWrapper: Send + Sync + 'static {
    // This trait decouples the bridge from an implementation of the MQTT
    // client. The binary wraps its client in a new type that implements it,
    // tests use an in-memory recorder. Publishing takes `&self` because the
    // availability timers publish from their own thread.

    fn subscribe(&self, topic: &str, qos: QoS) -> anyhow::Result<()>;

    fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>;
}
