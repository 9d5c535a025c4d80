//! File-backed configuration storage.
//!
//! The device configuration is kept as one pretty-printed JSON document.
//! Saves go to a sibling temp file first and are renamed into place, so a
//! power loss mid-write leaves the previous document intact.

use crate::config::{ConfigError, ConfigStorage, DeviceConfig};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    path: PathBuf,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load_device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let json = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfigError::NotFound(self.path.display().to_string()),
            _ => ConfigError::ReadError(format!("{}: {}", self.path.display(), e)),
        })?;
        serde_json::from_str(&json).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_device_config(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        fs::rename(&temp, &self.path).map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    fn has_device_config(&self) -> bool {
        self.path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_or_init;
    use crate::phase::CyclePhase;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("sensornode-store-{}-{}", std::process::id(), name))
            .join("config.json")
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let storage = FileConfigStorage::new(scratch_path("missing"));
        assert!(!storage.has_device_config());
        assert!(matches!(
            storage.load_device_config(),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let path = scratch_path("reload");
        let storage = FileConfigStorage::new(&path);

        let mut config = load_or_init(&storage).unwrap();
        config.device_uid = "node-42".to_string();
        config.cycle.finish(CyclePhase::TimePrinted);
        storage.save_device_config(&config).unwrap();

        let reloaded = FileConfigStorage::new(&path).load_device_config().unwrap();
        assert_eq!(reloaded, config);
        assert!(!storage.temp_path().exists());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_document_is_invalid_data() {
        let path = scratch_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let storage = FileConfigStorage::new(&path);
        assert!(matches!(
            storage.load_device_config(),
            Err(ConfigError::InvalidData(_))
        ));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
