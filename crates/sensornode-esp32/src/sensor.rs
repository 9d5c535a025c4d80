//! DHT11 / DHT22 sensor with a switchable supply pin.
//!
//! The sensor is powered only for the duration of a read. A failed read is
//! reported with the `FAILED_TO_MEASURE_VALUE` sentinel for both quantities.

use dht_sensor::{dht11, dht22, DhtReading};
use esp_idf_hal::delay::{Ets, FreeRtos};
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, PinDriver, Pull};
use log::{info, warn};
use sensornode_controller::{Sensor, SensorError};
use sensornode_core::{MeasurementPayload, Sample, SensorSettings, SensorType, FAILED_TO_MEASURE_VALUE};

const DHT11_WAKE_UP_MS: u32 = 1000;
const DHT22_WAKE_UP_MS: u32 = 500;

#[derive(Default)]
pub struct DhtSensor;

fn gpio_error(e: impl std::fmt::Debug) -> SensorError {
    SensorError::Unavailable(format!("GPIO setup failed: {:?}", e))
}

/// Temperature (C) and relative humidity (%), or `None` on a failed read.
fn read_dht(settings: &SensorSettings) -> Result<Option<(f64, f64)>, SensorError> {
    // Pin numbers come from the stored configuration; nothing else drives them.
    let data = unsafe { AnyIOPin::new(i32::from(settings.measurement_pin)) };
    let mut data = PinDriver::input_output_od(data).map_err(gpio_error)?;
    data.set_pull(Pull::Up).map_err(gpio_error)?;
    data.set_high().map_err(gpio_error)?;

    let power = unsafe { AnyOutputPin::new(i32::from(settings.power_pin)) };
    let mut power = PinDriver::output(power).map_err(gpio_error)?;
    power.set_high().map_err(gpio_error)?;

    let mut delay = Ets;
    let reading = match settings.sensor_type {
        SensorType::Dht11 => {
            FreeRtos::delay_ms(DHT11_WAKE_UP_MS);
            dht11::Reading::read(&mut delay, &mut data)
                .map(|r| (f64::from(r.temperature), f64::from(r.relative_humidity)))
        }
        SensorType::Dht22 => {
            FreeRtos::delay_ms(DHT22_WAKE_UP_MS);
            dht22::Reading::read(&mut delay, &mut data)
                .map(|r| (f64::from(r.temperature), f64::from(r.relative_humidity)))
        }
        SensorType::Bme280 => {
            return Err(SensorError::Unavailable(
                "BME280 is not supported by this driver".to_string(),
            ))
        }
    };

    if let Err(e) = power.set_low() {
        warn!("Failed to power down sensor: {:?}", e);
    }

    match reading {
        Ok(values) => Ok(Some(values)),
        Err(e) => {
            warn!(
                "Error while {:?} measure on GPIO{}: {:?}",
                settings.sensor_type, settings.measurement_pin, e
            );
            Ok(None)
        }
    }
}

impl Sensor for DhtSensor {
    fn acquire(
        &mut self,
        settings: &SensorSettings,
        timestamp_ms: i64,
    ) -> Result<MeasurementPayload, SensorError> {
        let (temperature, humidity) = read_dht(settings)?
            .unwrap_or((FAILED_TO_MEASURE_VALUE, FAILED_TO_MEASURE_VALUE));
        info!("{:?}: {} C, {} %", settings.sensor_type, temperature, humidity);

        let sample = |value: f64| {
            Sample::from_f64(timestamp_ms, value)
                .ok_or_else(|| SensorError::Read(format!("invalid reading {}", value)))
        };
        let mut payload = MeasurementPayload::new();
        payload.insert("temperature".to_string(), vec![sample(temperature)?]);
        payload.insert("humidity".to_string(), vec![sample(humidity)?]);
        Ok(payload)
    }
}
