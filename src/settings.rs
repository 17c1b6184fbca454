//! Durable local settings: a small key-value store and a settings service.
//!
//! The store is a shared resource across processes with no transactional
//! guarantee; last writer wins and readers must tolerate missing or stale
//! values.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{DeviceConfig, ValueRange, DEVICE_SLOTS};
use crate::error::Result;

/// Minimal string key-value storage. Implementations are injected at
/// construction, never looked up through ambient state.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// File-backed store: one file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

/// In-memory store, used for tests and single-process setups.
#[derive(Default)]
pub struct MemoryStore {
    map: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

const RANGE_KEY: &str = "meter-settings-range";
const DEVICES_KEY: &str = "meter-settings-devices";

/// Loads and saves the value range and the six device configurations.
pub struct SettingsService {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the persisted range, or the default when missing or unreadable.
    pub fn load_value_range(&self) -> ValueRange {
        self.store
            .get(RANGE_KEY)
            .and_then(|text| serde_json::from_str::<ValueRange>(&text).ok())
            .map(|r| ValueRange::new(r.min, r.max, r.unit))
            .unwrap_or_default()
    }

    pub fn save_value_range(&self, range: &ValueRange) -> Result<()> {
        let text = serde_json::to_string(range).expect("range serializes");
        self.store.set(RANGE_KEY, &text)
    }

    /// Load device configurations, filling missing slots with defaults so the
    /// result always covers all six devices in id order.
    pub fn load_device_configs(&self) -> Vec<DeviceConfig> {
        let stored: Vec<DeviceConfig> = self
            .store
            .get(DEVICES_KEY)
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        (1..=DEVICE_SLOTS as u8)
            .map(|id| {
                stored
                    .iter()
                    .find(|c| c.id == id)
                    .cloned()
                    .unwrap_or_else(|| DeviceConfig::new(id))
            })
            .collect()
    }

    pub fn save_device_configs(&self, configs: &[DeviceConfig]) -> Result<()> {
        let text = serde_json::to_string(configs).expect("configs serialize");
        debug!(count = configs.len(), "saving device configs");
        self.store.set(DEVICES_KEY, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_fall_back_to_defaults() {
        let service = SettingsService::new(Arc::new(MemoryStore::new()));
        assert_eq!(service.load_value_range(), ValueRange::default());
        let configs = service.load_device_configs();
        assert_eq!(configs.len(), DEVICE_SLOTS);
        assert_eq!(configs[3].id, 4);
    }

    #[test]
    fn settings_roundtrip() {
        let service = SettingsService::new(Arc::new(MemoryStore::new()));
        let range = ValueRange::new(-10.0, 40.0, "deg");
        service.save_value_range(&range).unwrap();
        assert_eq!(service.load_value_range(), range);

        let configs = vec![DeviceConfig::new(2).with_name("pump")];
        service.save_device_configs(&configs).unwrap();
        let loaded = service.load_device_configs();
        assert_eq!(loaded[1].name, "pump");
        // Slots not present in storage come back as defaults.
        assert_eq!(loaded[0], DeviceConfig::new(1));
    }

    #[test]
    fn corrupt_stored_settings_are_tolerated() {
        let store = Arc::new(MemoryStore::new());
        store.set(RANGE_KEY, "{broken").unwrap();
        let service = SettingsService::new(store);
        assert_eq!(service.load_value_range(), ValueRange::default());
    }

    #[test]
    fn file_store_roundtrip_and_missing_read() {
        let dir = std::env::temp_dir().join(format!("meterbridge-kv-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir);
        assert_eq!(store.get("absent"), None);
        store.set("overlay:state", "{\"x\":1}").unwrap();
        assert_eq!(store.get("overlay:state").as_deref(), Some("{\"x\":1}"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
