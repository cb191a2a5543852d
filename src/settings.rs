//! Settings store: the set of hosts the daemon should poll, and per-device
//! overrides (spec.md §4.7). Backed by an in-memory map; a real deployment
//! would swap this for something persistent without touching callers, which
//! is why it is a trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub host: String,
    pub port: u16,
    pub phase_count: Option<u8>,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn known_devices(&self) -> Vec<DeviceSettings>;
    async fn add_device(&self, settings: DeviceSettings);
    async fn remove_device(&self, host: &str);
    async fn auto_detect(&self) -> bool;
    async fn set_auto_detect(&self, enabled: bool);
}

#[derive(Default)]
pub struct InMemorySettingsStore {
    devices: RwLock<HashMap<String, DeviceSettings>>,
    auto_detect: RwLock<bool>,
}

impl InMemorySettingsStore {
    pub fn new(auto_detect: bool) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            auto_detect: RwLock::new(auto_detect),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn known_devices(&self) -> Vec<DeviceSettings> {
        self.devices.read().await.values().cloned().collect()
    }

    async fn add_device(&self, settings: DeviceSettings) {
        self.devices
            .write()
            .await
            .insert(settings.host.clone(), settings);
    }

    async fn remove_device(&self, host: &str) {
        self.devices.write().await.remove(host);
    }

    async fn auto_detect(&self) -> bool {
        *self.auto_detect.read().await
    }

    async fn set_auto_detect(&self, enabled: bool) {
        *self.auto_detect.write().await = enabled;
    }
}
