//! Device configuration in NVS flash.
//!
//! The whole `DeviceConfig` is stored as one JSON blob. Blobs rather than
//! strings because TLS material easily exceeds the NVS string limit.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use sensornode_core::{ConfigError, ConfigStorage, DeviceConfig};
use std::sync::{Mutex, PoisonError};

const NAMESPACE: &str = "sensornode";
const CONFIG_KEY: &str = "device_config";

pub struct NvsConfigStorage {
    partition: EspDefaultNvsPartition,
    lock: Mutex<()>,
}

impl NvsConfigStorage {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition,
            lock: Mutex::new(()),
        }
    }

    fn open(&self) -> Result<EspNvs<NvsDefault>, ConfigError> {
        EspNvs::new(self.partition.clone(), NAMESPACE, true)
            .map_err(|e| ConfigError::ReadError(format!("NVS namespace {}: {}", NAMESPACE, e)))
    }
}

impl ConfigStorage for NvsConfigStorage {
    fn load_device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let nvs = self.open()?;

        let len = nvs
            .blob_len(CONFIG_KEY)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?
            .ok_or_else(|| ConfigError::NotFound(format!("nvs:{}/{}", NAMESPACE, CONFIG_KEY)))?;
        let mut buffer = vec![0u8; len];
        let json = nvs
            .get_blob(CONFIG_KEY, &mut buffer)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?
            .ok_or_else(|| ConfigError::NotFound(format!("nvs:{}/{}", NAMESPACE, CONFIG_KEY)))?;

        serde_json::from_slice(json).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_device_config(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let json =
            serde_json::to_vec(config).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        let mut nvs = self.open()?;
        nvs.set_blob(CONFIG_KEY, &json)
            .map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    fn has_device_config(&self) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.open()
            .and_then(|nvs| {
                nvs.contains(CONFIG_KEY)
                    .map_err(|e| ConfigError::ReadError(e.to_string()))
            })
            .unwrap_or(false)
    }
}
