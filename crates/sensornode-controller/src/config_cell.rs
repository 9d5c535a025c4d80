//! Single owner of the device configuration.
//!
//! Components never write the configuration record directly. They go through
//! the narrow update methods here, each of which mutates the in-memory copy
//! and persists the full record while holding the lock, so saves reach
//! storage in mutation order.

use sensornode_core::{
    load_or_init, ConfigError, ConfigStorage, ConfigurationRequest, CycleState, CyclePhase,
    DeviceConfig,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
pub struct ConfigCell {
    config: Arc<Mutex<DeviceConfig>>,
    storage: Arc<dyn ConfigStorage>,
}

impl ConfigCell {
    /// Load the stored configuration, initializing a blank device.
    pub fn load(storage: Arc<dyn ConfigStorage>) -> Result<Self, ConfigError> {
        let config = load_or_init(storage.as_ref())?;
        Ok(Self {
            config: Arc::new(Mutex::new(config)),
            storage,
        })
    }

    fn lock(&self) -> MutexGuard<'_, DeviceConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current record.
    pub fn snapshot(&self) -> DeviceConfig {
        self.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&DeviceConfig) -> R) -> R {
        f(&self.lock())
    }

    pub fn cycle(&self) -> CycleState {
        self.lock().cycle
    }

    fn update<R>(&self, f: impl FnOnce(&mut DeviceConfig) -> R) -> Result<R, ConfigError> {
        let mut config = self.lock();
        let result = f(&mut config);
        self.storage.save_device_config(&config)?;
        Ok(result)
    }

    pub fn finish_phase(&self, phase: CyclePhase) -> Result<(), ConfigError> {
        self.update(|config| config.cycle.finish(phase))
    }

    pub fn fail_phase(&self, phase: CyclePhase) -> Result<(), ConfigError> {
        self.update(|config| config.cycle.fail(phase))
    }

    /// Start a new cycle: every progress flag reads false afterwards.
    pub fn reset_cycle(&self) -> Result<(), ConfigError> {
        self.update(|config| config.cycle.reset())
    }

    pub fn set_connection_tested(&self, tested: bool) -> Result<(), ConfigError> {
        self.update(|config| config.connection_tested = tested)
    }

    pub fn set_publishing_period(&self, period_ms: i64) -> Result<(), ConfigError> {
        self.update(|config| config.timing.data_publishing_period_ms = period_ms)
    }

    /// Apply an operator configuration. Invalid requests leave the record untouched.
    pub fn apply_configuration(&self, request: ConfigurationRequest) -> Result<(), ConfigError> {
        let mut config = self.lock();
        let mut updated = config.clone();
        updated.apply(request)?;
        self.storage.save_device_config(&updated)?;
        *config = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensornode_core::MemoryConfigStorage;

    #[test]
    fn test_updates_are_persisted() {
        let storage = Arc::new(MemoryConfigStorage::new());
        let cell = ConfigCell::load(storage.clone()).unwrap();

        cell.finish_phase(CyclePhase::ConnectionTested).unwrap();
        cell.set_publishing_period(60_000).unwrap();

        let stored = storage.load_device_config().unwrap();
        assert_eq!(stored.cycle.phase, CyclePhase::ConnectionTested);
        assert_eq!(stored.timing.data_publishing_period_ms, 60_000);
        assert_eq!(stored, cell.snapshot());
    }

    #[test]
    fn test_reset_round_trip_reads_all_false() {
        let storage = Arc::new(MemoryConfigStorage::new());
        let cell = ConfigCell::load(storage.clone()).unwrap();
        cell.finish_phase(CyclePhase::Published).unwrap();
        assert!(cell.read(|c| c.progress().published_to_cloud));

        cell.reset_cycle().unwrap();
        let reloaded = ConfigCell::load(storage).unwrap();
        assert!(!reloaded.read(|c| c.progress().any()));
    }

    #[test]
    fn test_invalid_configuration_leaves_record() {
        let storage = Arc::new(MemoryConfigStorage::new());
        let cell = ConfigCell::load(storage.clone()).unwrap();
        let writes = storage.write_count();

        let request: ConfigurationRequest = serde_json::from_value(serde_json::json!({
            "credentials": [{"ssid": "homewifi", "password": "A"}],
            "cloud": {"provider": "thingsboard"}
        }))
        .unwrap();
        assert!(cell.apply_configuration(request).is_err());
        assert_eq!(storage.write_count(), writes);
        assert!(!cell.read(|c| c.ap_config_done));
    }
}
