//! Hook fixture for the route and server tests.

use sensornode_controller::{
    Clock, ClockError, ConfigCell, ConfigurationHook, ConnectivityManager, ConnectivitySettings,
    EventQueue, Instruments, Radio, RadioError, Sensor, SensorError,
};
use sensornode_core::{
    Credential, MeasurementPayload, MemoryConfigStorage, Sample, ScanResult, SensorSettings,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub(crate) const NOW_MS: i64 = 1_700_000_000_000;

pub(crate) type Readings = Arc<Mutex<VecDeque<Result<MeasurementPayload, SensorError>>>>;

/// Radio that accepts everything and never joins a network.
struct IdleRadio;

impl Radio for IdleRadio {
    fn activate_station(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError> {
        Ok(Vec::new())
    }

    fn join(&mut self, _credential: &Credential) -> Result<(), RadioError> {
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        false
    }

    fn leave(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn deactivate_station(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn start_access_point(&mut self, _name: &str, _password: &str) -> Result<(), RadioError> {
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), RadioError> {
        Ok(())
    }
}

/// Sensor replaying scripted results, then a fixed temperature.
struct ScriptedSensor(Readings);

impl Sensor for ScriptedSensor {
    fn acquire(
        &mut self,
        _settings: &SensorSettings,
        timestamp_ms: i64,
    ) -> Result<MeasurementPayload, SensorError> {
        self.0.lock().unwrap().pop_front().unwrap_or_else(|| {
            let mut payload = MeasurementPayload::new();
            payload.insert(
                "temperature".to_string(),
                vec![Sample::from_f64(timestamp_ms, 21.5).unwrap()],
            );
            Ok(payload)
        })
    }
}

struct FrozenClock;

impl Clock for FrozenClock {
    fn now_ms(&self) -> i64 {
        NOW_MS
    }

    fn synchronize(&mut self) -> Result<(), ClockError> {
        Ok(())
    }
}

pub(crate) struct Fixture {
    pub hook: ConfigurationHook,
    pub queue: EventQueue,
    pub storage: Arc<MemoryConfigStorage>,
    pub readings: Readings,
    pub instruments: Instruments,
}

/// A blank node with its configuration access point up.
pub(crate) fn fixture() -> Fixture {
    let storage = Arc::new(MemoryConfigStorage::new());
    let config = ConfigCell::load(storage.clone()).unwrap();
    let mut connectivity =
        ConnectivityManager::new(Box::new(IdleRadio), ConnectivitySettings::default());
    connectivity
        .configure_access_point(&config.read(|c| c.access_point_name()), "configure-me")
        .unwrap();

    let queue = EventQueue::new();
    let readings = Readings::default();
    let instruments = Instruments::new(
        Box::new(ScriptedSensor(readings.clone())),
        Box::new(FrozenClock),
    );
    let hook = ConfigurationHook::new(
        config,
        queue.clone(),
        Arc::new(Mutex::new(connectivity)),
        instruments.clone(),
    );
    Fixture {
        hook,
        queue,
        storage,
        readings,
        instruments,
    }
}
