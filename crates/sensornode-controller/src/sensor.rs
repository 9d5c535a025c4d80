//! Sensor acquisition collaborator.

use crate::clock::Clock;
use crate::error::{ClockError, SensorError};
use sensornode_core::{MeasurementPayload, SensorSettings};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A sensor driver.
///
/// Drivers report a failed read either as an error or with the
/// `FAILED_TO_MEASURE_VALUE` sentinel; the scheduler treats both as
/// "no data" for the cycle.
pub trait Sensor: Send {
    /// Read every quantity, stamping samples from `timestamp_ms`.
    fn acquire(
        &mut self,
        settings: &SensorSettings,
        timestamp_ms: i64,
    ) -> Result<MeasurementPayload, SensorError>;
}

/// Outcome of a test acquisition requested by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestAcquisition {
    pub succeeded: bool,
    pub comment: String,
    pub finished_at_ms: i64,
}

/// Sensor and clock shared by the scheduler and the configuration hook.
///
/// Also keeps the outcome of the last test acquisition so the status
/// endpoint can report it after the scheduler has run it.
#[derive(Clone)]
pub struct Instruments {
    sensor: Arc<Mutex<Box<dyn Sensor>>>,
    clock: Arc<Mutex<Box<dyn Clock>>>,
    last_test: Arc<Mutex<Option<TestAcquisition>>>,
}

impl Instruments {
    pub fn new(sensor: Box<dyn Sensor>, clock: Box<dyn Clock>) -> Self {
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
            clock: Arc::new(Mutex::new(clock)),
            last_test: Arc::default(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        lock(&self.clock).now_ms()
    }

    pub fn synchronize(&self) -> Result<(), ClockError> {
        lock(&self.clock).synchronize()
    }

    /// One acquisition stamped with the current time.
    pub fn measure(
        &self,
        settings: &SensorSettings,
    ) -> Result<(i64, MeasurementPayload), SensorError> {
        let now = self.now_ms();
        let payload = lock(&self.sensor).acquire(settings, now)?;
        Ok((now, payload))
    }

    pub fn record_test(&self, outcome: TestAcquisition) {
        *lock(&self.last_test) = Some(outcome);
    }

    pub fn last_test(&self) -> Option<TestAcquisition> {
        lock(&self.last_test).clone()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensornode_core::Sample;

    struct CountingSensor(usize);

    impl Sensor for CountingSensor {
        fn acquire(
            &mut self,
            _settings: &SensorSettings,
            timestamp_ms: i64,
        ) -> Result<MeasurementPayload, SensorError> {
            self.0 += 1;
            let mut payload = MeasurementPayload::new();
            payload.insert("count".to_string(), vec![Sample::new(timestamp_ms, self.0)]);
            Ok(payload)
        }
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            5_000
        }

        fn synchronize(&mut self) -> Result<(), ClockError> {
            Err(ClockError::Sync("offline".to_string()))
        }
    }

    #[test]
    fn test_clones_share_sensor_state() {
        let instruments = Instruments::new(Box::new(CountingSensor(0)), Box::new(FixedClock));
        let other = instruments.clone();

        instruments.measure(&SensorSettings::default()).unwrap();
        let (now, payload) = other.measure(&SensorSettings::default()).unwrap();
        assert_eq!(now, 5_000);
        assert_eq!(payload["count"], vec![Sample::new(5_000, 2)]);
        assert!(other.synchronize().is_err());
    }

    #[test]
    fn test_last_test_visible_to_clones() {
        let instruments = Instruments::new(Box::new(CountingSensor(0)), Box::new(FixedClock));
        assert_eq!(instruments.last_test(), None);

        let outcome = TestAcquisition {
            succeeded: true,
            comment: "ok".to_string(),
            finished_at_ms: 1,
        };
        instruments.clone().record_test(outcome.clone());
        assert_eq!(instruments.last_test(), Some(outcome));
    }
}
