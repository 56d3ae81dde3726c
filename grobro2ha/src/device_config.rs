use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use log::{debug, error, info, warn};
use serde_derive::{Deserialize, Serialize};

/// Metadata a device reports about itself, persisted one file per device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(alias = "serial_number")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

impl DeviceConfig {
    /// A config that only knows the device's serial number.
    pub fn minimal(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            ..Default::default()
        }
    }

    /// Marketing name of the device series, if it can be told from the config.
    pub fn model(&self) -> Option<&str> {
        let known = match self.device_type.as_deref() {
            Some("55") => Some("NEO-series"),
            Some("72") => Some("NEXA-series"),
            Some("61") => Some("NOAH-series"),
            _ => None,
        };
        known.or(self.model_id.as_deref())
    }
}

/// Persistent storage for device configs, keyed by device id.
pub trait ConfigStore: Send + Sync {
    fn load(&self, device_id: &str) -> anyhow::Result<Option<DeviceConfig>>;

    fn save(&self, config: &DeviceConfig) -> anyhow::Result<()>;

    fn load_all(&self) -> anyhow::Result<Vec<DeviceConfig>>;
}

/// Stores each device as `config_<device_id>.json` in a directory.
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, device_id: &str) -> PathBuf {
        self.dir.join(format!("config_{device_id}.json"))
    }

    fn read(path: &Path) -> anyhow::Result<Option<DeviceConfig>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(config))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self, device_id: &str) -> anyhow::Result<Option<DeviceConfig>> {
        Self::read(&self.path_for(device_id))
    }

    fn save(&self, config: &DeviceConfig) -> anyhow::Result<()> {
        let path = self.path_for(&config.device_id);
        let contents = serde_json::to_string_pretty(config)?;
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
    }

    fn load_all(&self) -> anyhow::Result<Vec<DeviceConfig>> {
        let mut configs = Vec::new();
        let entries =
            fs::read_dir(&self.dir).with_context(|| format!("listing {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_config = path.file_name().and_then(|name| name.to_str()).is_some_and(
                |name| name.starts_with("config_") && name.ends_with(".json"),
            );
            if !is_config {
                continue;
            }
            match Self::read(&path) {
                Ok(Some(config)) => configs.push(config),
                Ok(None) => {}
                Err(e) => warn!("Skipping device config: {e:#}"),
            }
        }
        Ok(configs)
    }
}

/// Resolves device configs through cache, storage and a synthesized default.
pub struct ConfigResolver<S: ConfigStore> {
    store: S,
    cache: Mutex<HashMap<String, DeviceConfig>>,
}

impl<S: ConfigStore> ConfigResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fill the cache with every config found in storage.
    pub fn preload(&self) -> usize {
        let configs = match self.store.load_all() {
            Ok(configs) => configs,
            Err(e) => {
                warn!("Could not preload device configs: {e:#}");
                return 0;
            }
        };
        let count = configs.len();
        let mut cache = self.lock();
        for config in configs {
            cache.insert(config.device_id.clone(), config);
        }
        info!("Preloaded {count} device config(s)");
        count
    }

    /// Never fails: a device nobody knows about gets a minimal config, which
    /// is persisted right away.
    pub fn resolve(&self, device_id: &str) -> DeviceConfig {
        let mut cache = self.lock();
        if let Some(config) = cache.get(device_id) {
            return config.clone();
        }

        match self.store.load(device_id) {
            Ok(Some(config)) => {
                info!("Loaded cached config for {device_id} from storage");
                cache.insert(device_id.to_string(), config.clone());
                return config;
            }
            Ok(None) => {}
            Err(e) => warn!("Could not load config for {device_id}: {e:#}"),
        }

        let config = DeviceConfig::minimal(device_id);
        if let Err(e) = self.store.save(&config) {
            error!("Could not save minimal config for {device_id}: {e:#}");
        }
        info!("Saved minimal config for new device {device_id}");
        cache.insert(device_id.to_string(), config.clone());
        config
    }

    /// Store `config` as the device's current config. Returns whether it was
    /// written to storage; identical configs are not rewritten.
    pub fn update(&self, config: DeviceConfig) -> bool {
        let mut cache = self.lock();
        let existing = match cache.get(&config.device_id) {
            Some(existing) => Some(existing.clone()),
            None => self.store.load(&config.device_id).unwrap_or_else(|e| {
                warn!("Could not load config for {}: {e:#}", config.device_id);
                None
            }),
        };

        let written = if existing.as_ref() == Some(&config) {
            debug!("No config change for {}", config.device_id);
            false
        } else {
            info!("Saving updated config for {}", config.device_id);
            match self.store.save(&config) {
                Ok(()) => true,
                Err(e) => {
                    error!("Could not save config for {}: {e:#}", config.device_id);
                    false
                }
            }
        };
        cache.insert(config.device_id.clone(), config);
        written
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DeviceConfig>> {
        // a poisoned cache still holds valid configs
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
