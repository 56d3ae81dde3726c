// externally visible interfaces
pub mod availability;
pub mod catalog;
pub mod command;
pub mod device_config;
pub mod discovery;
pub mod error;
pub mod home_assistant;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod topics;

pub use catalog::{Catalog, DeviceType, EntityKind};
pub use command::Command;
pub use device_config::{DeviceConfig, FileConfigStore};
pub use error::BridgeError;
pub use home_assistant::{BridgeConfig, HomeAssistant};
