//! Event scheduler.
//!
//! One measurement cycle is a strict pipeline of phase events:
//!
//! ```text
//! TestConnection -> PrintTime -> GetSensorData -> PublishData -> GoToSleep
//! ```
//!
//! Each phase enqueues its successor when it completes. `ConfigureAccessPoint`
//! replaces the pipeline when the node needs an operator; the configuration
//! server then raises `GoToSleep` through the hook. `ErrorOccurred` can be
//! raised by any phase and is followed by `GoToSleep`, so every cycle ends
//! in sleep. `TestDataAcquisition` is raised by the configuration interface
//! and reads the sensor once without touching the cycle token.
//!
//! The consumer loop pops one event at a time and polls the queue on a fixed
//! tick when it is empty. Phase waits, the whole cycle and the configuration
//! window are bounded; running over any bound forces sleep.

use crate::adapter::CloudAdapterHandle;
use crate::clock::{format_timestamp, Clock};
use crate::indicator::Indicator;
use crate::config_cell::ConfigCell;
use crate::connectivity::ConnectivityManager;
use crate::error::{ClockError, ErrorClass, SchedulerError, TransportError};
use crate::event::{Event, EventKind, EventQueue};
use crate::hook::{ConfigurationHook, ConfigurationServer};
use crate::mqtt::QoS;
use crate::power::{PowerCycle, WakeCause};
use crate::sensor::{Instruments, Sensor, TestAcquisition};
use crate::transport::TelemetryTransport;
use sensornode_core::{payload_is_unusable, CyclePhase, CycleState, DeviceConfig, MeasurementEnvelope};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Queue poll interval, also the yield interval of phase waits.
    pub tick: Duration,
    /// Longest a phase waits for its predecessor.
    pub phase_wait_timeout: Duration,
    /// Longest a measurement cycle may run before sleep is forced.
    pub cycle_timeout: Duration,
    /// Longest the node waits for an operator in configuration mode.
    pub configuration_timeout: Duration,
    /// Time synchronization attempts during the self-test.
    pub time_sync_attempts: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            phase_wait_timeout: Duration::from_secs(60),
            cycle_timeout: Duration::from_secs(5 * 60),
            configuration_timeout: Duration::from_secs(10 * 60),
            time_sync_attempts: 5,
        }
    }
}

/// Everything the scheduler drives.
pub struct NodeParts {
    pub config: ConfigCell,
    pub connectivity: ConnectivityManager,
    pub transport: TelemetryTransport,
    pub power: PowerCycle,
    pub sensor: Box<dyn Sensor>,
    pub clock: Box<dyn Clock>,
    pub indicator: Box<dyn Indicator>,
    pub configuration_server: Box<dyn ConfigurationServer>,
}

/// How a wake cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepReport {
    pub wake: WakeCause,
    pub duration_ms: u64,
    pub published: bool,
    /// Class of every `ErrorOccurred` event processed, in order.
    pub errors: Vec<ErrorClass>,
}

pub struct EventScheduler {
    config: ConfigCell,
    connectivity: Arc<Mutex<ConnectivityManager>>,
    transport: TelemetryTransport,
    power: PowerCycle,
    instruments: Instruments,
    indicator: Box<dyn Indicator>,
    configuration_server: Box<dyn ConfigurationServer>,
    queue: EventQueue,
    settings: SchedulerSettings,
    wake: WakeCause,
    started: Instant,
    configuring_since: Option<Instant>,
    sleep_forced: bool,
    published: bool,
    errors: Vec<ErrorClass>,
}

impl EventScheduler {
    pub fn new(parts: NodeParts, settings: SchedulerSettings) -> Self {
        let wake = parts.power.classify_wake();
        Self {
            config: parts.config,
            connectivity: Arc::new(Mutex::new(parts.connectivity)),
            transport: parts.transport,
            power: parts.power,
            instruments: Instruments::new(parts.sensor, parts.clock),
            indicator: parts.indicator,
            configuration_server: parts.configuration_server,
            queue: EventQueue::new(),
            settings,
            wake,
            started: Instant::now(),
            configuring_since: None,
            sleep_forced: false,
            published: false,
            errors: Vec::new(),
        }
    }

    pub fn wake_cause(&self) -> WakeCause {
        self.wake
    }

    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    pub fn add_event(&self, event: Event) {
        self.queue.add_event(event);
    }

    /// The hook handed to the configuration server.
    pub fn hook(&self) -> ConfigurationHook {
        ConfigurationHook::new(
            self.config.clone(),
            self.queue.clone(),
            self.connectivity.clone(),
            self.instruments.clone(),
        )
    }

    /// Decide how this wake starts and enqueue the first event.
    pub fn boot(&mut self) -> WakeCause {
        info!("Boot, wake cause {:?}", self.wake);

        let cycle = self.config.cycle();
        if cycle != CycleState::default() {
            warn!(
                "Previous cycle interrupted after {:?}, starting a new one",
                cycle.phase
            );
            if let Err(e) = self.config.reset_cycle() {
                error!("Failed to reset interrupted cycle: {}", e);
            }
        }

        if self.wake.forces_configuration() {
            info!("Configuration requested by pin wake");
            self.queue.add_event(Event::new(EventKind::ConfigureAccessPoint));
        } else if self.config.read(DeviceConfig::needs_configuration) {
            info!("Node not configured yet");
            self.queue.add_event(Event::new(EventKind::ConfigureAccessPoint));
        } else {
            self.queue.add_event(Event::new(EventKind::TestConnection));
        }

        self.started = Instant::now();
        self.wake
    }

    /// Boot and run until the node goes to sleep.
    pub fn run(mut self) -> Result<SleepReport, SchedulerError> {
        self.boot();
        self.perform()
    }

    /// Consume events until `GoToSleep` has been processed.
    pub fn perform(&mut self) -> Result<SleepReport, SchedulerError> {
        loop {
            self.check_deadlines();

            let next = self.queue.pop();
            match next {
                Some(event) => {
                    if let Some(report) = self.dispatch(event)? {
                        return Ok(report);
                    }
                }
                None => thread::sleep(self.settings.tick),
            }
        }
    }

    fn dispatch(&mut self, mut event: Event) -> Result<Option<SleepReport>, SchedulerError> {
        let kind = event.kind;
        debug!(phase = ?kind, "Processing event");

        let result = match kind {
            EventKind::GoToSleep => {
                let report = self.go_to_sleep(&event);
                event.complete(report.is_ok());
                return report.map(Some);
            }
            EventKind::ErrorOccurred => {
                self.report_error(&event);
                event.complete(true);
                return Ok(None);
            }
            EventKind::TestDataAcquisition => {
                let outcome = self.test_data_acquisition();
                let succeeded = outcome.succeeded;
                self.instruments.record_test(outcome);
                event.complete(succeeded);
                return Ok(None);
            }
            EventKind::ConfigureAccessPoint => self.configure_access_point(),
            EventKind::TestConnection => self.test_connection(),
            EventKind::PrintTime => self.print_time(),
            EventKind::GetSensorData => self.get_sensor_data(),
            EventKind::PublishData => self.publish_data(&event),
        };

        match result {
            Ok(()) => event.complete(true),
            Err(SchedulerError::PredecessorFailed { kind }) => {
                debug!(phase = ?kind, "Skipped after earlier failure");
                event.complete(false);
            }
            Err(e) => {
                self.phase_failed(kind, &e);
                event.complete(false);
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------------

    fn configure_access_point(&mut self) -> Result<(), SchedulerError> {
        let config = self.config.snapshot();
        let name = config.access_point_name();
        {
            let mut connectivity = self.connectivity();
            connectivity.disconnect_station();
            connectivity.configure_access_point(&name, &config.access_point.password)?;
        }

        let hook = self.hook();
        self.configuration_server
            .start(hook)
            .map_err(SchedulerError::ConfigurationServer)?;
        self.configuring_since = Some(Instant::now());
        info!("Waiting for configuration on access point '{}'", name);
        Ok(())
    }

    fn test_connection(&mut self) -> Result<(), SchedulerError> {
        let config = self.config.snapshot();
        if !self.wake.requires_self_test() && config.connection_tested {
            debug!("Connectivity verified on an earlier wake");
            self.config.finish_phase(CyclePhase::ConnectionTested)?;
            self.queue.add_event(Event::new(EventKind::PrintTime));
            return Ok(());
        }

        info!("Running connectivity self-test");
        let handle = CloudAdapterHandle::from_config(&config).map_err(TransportError::from)?;
        let connectivity = self.connectivity.clone();
        {
            let mut connectivity = lock(&connectivity);
            connectivity.connect_station(&config.credentials)?;
            let result = self
                .synchronize_time()
                .map_err(SchedulerError::from)
                .and_then(|()| {
                    self.transport
                        .check_connection(&handle)
                        .map_err(SchedulerError::from)
                });
            connectivity.disconnect_station();
            result?;
        }

        self.config.set_connection_tested(true)?;
        self.config.finish_phase(CyclePhase::ConnectionTested)?;
        self.queue.add_event(Event::new(EventKind::PrintTime));
        Ok(())
    }

    fn print_time(&mut self) -> Result<(), SchedulerError> {
        self.wait_for(EventKind::PrintTime, CyclePhase::ConnectionTested)?;
        info!("Current time: {}", format_timestamp(self.instruments.now_ms()));
        self.config.finish_phase(CyclePhase::TimePrinted)?;
        self.queue.add_event(Event::new(EventKind::GetSensorData));
        Ok(())
    }

    fn get_sensor_data(&mut self) -> Result<(), SchedulerError> {
        self.wait_for(EventKind::GetSensorData, CyclePhase::TimePrinted)?;

        let config = self.config.snapshot();
        let (now, payload) = match self.instruments.measure(&config.sensor) {
            Ok((now, payload)) if !payload_is_unusable(&payload) => (now, payload),
            Ok(_) => {
                warn!("Sensor returned no usable data, skipping publish");
                return self.skip_to_sleep(CyclePhase::SensorDataAcquired);
            }
            Err(e) => {
                warn!("{}, skipping publish", e);
                return self.skip_to_sleep(CyclePhase::SensorDataAcquired);
            }
        };

        let envelope = MeasurementEnvelope::new(config.device_uid.clone(), now, payload);
        let encoded = serde_json::to_value(&envelope)
            .map_err(|e| SchedulerError::InvalidPayload(e.to_string()))?;
        debug!("Measured {} quantities", envelope.payload().len());

        self.config.finish_phase(CyclePhase::SensorDataAcquired)?;
        self.queue
            .add_event(Event::new(EventKind::PublishData).with("envelope", encoded));
        Ok(())
    }

    fn publish_data(&mut self, event: &Event) -> Result<(), SchedulerError> {
        self.wait_for(EventKind::PublishData, CyclePhase::SensorDataAcquired)?;

        let envelope: MeasurementEnvelope = event
            .payload
            .get("envelope")
            .cloned()
            .ok_or_else(|| SchedulerError::InvalidPayload("missing envelope".to_string()))
            .and_then(|value| {
                serde_json::from_value(value)
                    .map_err(|e| SchedulerError::InvalidPayload(e.to_string()))
            })?;

        let config = self.config.snapshot();
        let handle = CloudAdapterHandle::from_config(&config).map_err(TransportError::from)?;
        let qos = QoS::from_level(config.mqtt.qos);

        let connectivity = self.connectivity.clone();
        let delivered = {
            let mut connectivity = lock(&connectivity);
            self.transport.deliver(
                &mut connectivity,
                &config.credentials,
                &handle,
                &envelope,
                qos,
            )
        };
        if config.sensor.blink_led {
            self.indicator.signal(delivered.is_ok());
        }
        let report = delivered?;

        if let Some(period) = report.publish_period_ms {
            if period != config.timing.data_publishing_period_ms {
                self.config.set_publishing_period(period)?;
            }
        }
        self.config.finish_phase(CyclePhase::Published)?;
        self.published = true;
        self.queue.add_event(Event::new(EventKind::GoToSleep));
        Ok(())
    }

    fn go_to_sleep(&mut self, event: &Event) -> Result<SleepReport, SchedulerError> {
        if self.configuring_since.take().is_some() {
            self.configuration_server.stop();
        }
        {
            let mut connectivity = self.connectivity();
            connectivity.disable_access_point();
            connectivity.disconnect_station();
        }
        self.queue.clear();

        let configured_ms = event
            .payload
            .get("sleep_ms")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| self.config.read(|c| c.timing.data_publishing_period_ms));
        let duration_ms = self.power.suspend(&self.config, configured_ms)?;

        Ok(SleepReport {
            wake: self.wake,
            duration_ms,
            published: self.published,
            errors: std::mem::take(&mut self.errors),
        })
    }

    /// One sensor read for the operator. The cycle token is left alone.
    fn test_data_acquisition(&self) -> TestAcquisition {
        let settings = self.config.read(|c| c.sensor);
        let (succeeded, comment) = match self.instruments.measure(&settings) {
            Ok((_, payload)) if !payload_is_unusable(&payload) => {
                info!("Test acquisition read {} quantities", payload.len());
                (true, "Sensor data acquired".to_string())
            }
            Ok(_) => {
                warn!("Test acquisition returned no usable data");
                (false, "Sensor returned no usable data".to_string())
            }
            Err(e) => {
                warn!("Test acquisition failed: {}", e);
                (false, format!("Failed to read sensor data: {}", e))
            }
        };
        TestAcquisition {
            succeeded,
            comment,
            finished_at_ms: self.instruments.now_ms(),
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn connectivity(&self) -> MutexGuard<'_, ConnectivityManager> {
        lock(&self.connectivity)
    }

    /// Block until `predecessor` has finished, yielding every tick.
    fn wait_for(&self, kind: EventKind, predecessor: CyclePhase) -> Result<(), SchedulerError> {
        let start = Instant::now();
        loop {
            let cycle = self.config.cycle();
            if cycle.has_finished(predecessor) {
                return if cycle.has_succeeded(predecessor) {
                    Ok(())
                } else {
                    Err(SchedulerError::PredecessorFailed { kind })
                };
            }

            let waited = start.elapsed();
            if waited >= self.settings.phase_wait_timeout {
                return Err(SchedulerError::Timeout {
                    kind,
                    waited_ms: waited.as_millis() as u64,
                });
            }
            thread::sleep(self.settings.tick);
        }
    }

    fn synchronize_time(&mut self) -> Result<(), ClockError> {
        let attempts = self.settings.time_sync_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.instruments.synchronize() {
                Ok(()) => {
                    info!("Time synchronized: {}", format_timestamp(self.instruments.now_ms()));
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, "{}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ClockError::Sync("no attempt made".to_string())))
    }

    /// End the cycle early without raising an error.
    fn skip_to_sleep(&mut self, phase: CyclePhase) -> Result<(), SchedulerError> {
        self.config.fail_phase(phase)?;
        self.queue.add_event(Event::new(EventKind::GoToSleep));
        Ok(())
    }

    fn phase_failed(&mut self, kind: EventKind, err: &SchedulerError) {
        if let Some(phase) = cycle_phase(kind) {
            if let Err(e) = self.config.fail_phase(phase) {
                warn!("Failed to record failure of {:?}: {}", kind, e);
            }
        }
        self.raise_error(kind, err);
        self.queue.add_event(Event::new(EventKind::GoToSleep));
    }

    fn raise_error(&self, kind: EventKind, err: &SchedulerError) {
        let event = Event::new(EventKind::ErrorOccurred)
            .with("phase", serde_json::to_value(kind).unwrap_or(Value::Null))
            .with("class", serde_json::to_value(err.class()).unwrap_or(Value::Null))
            .with("error", err.to_string());
        self.queue.add_event(event);
    }

    fn report_error(&mut self, event: &Event) {
        let class = event
            .payload
            .get("class")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(ErrorClass::Internal);
        self.errors.push(class);
        let field = |key: &str| {
            event
                .payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string()
        };
        let (phase, class, message) = (field("phase"), field("class"), field("error"));
        error!(phase = %phase, class = %class, "Cycle error: {}", message);
    }

    /// Force the cycle to end once a time bound is exceeded.
    fn check_deadlines(&mut self) {
        if self.sleep_forced {
            return;
        }
        let (kind, limit, since) = match self.configuring_since {
            Some(since) => (
                EventKind::ConfigureAccessPoint,
                self.settings.configuration_timeout,
                since,
            ),
            None => (
                pending_kind(self.config.cycle().phase),
                self.settings.cycle_timeout,
                self.started,
            ),
        };

        let waited = since.elapsed();
        if waited < limit {
            return;
        }

        self.sleep_forced = true;
        self.queue.clear();
        let err = SchedulerError::Timeout {
            kind,
            waited_ms: waited.as_millis() as u64,
        };
        self.raise_error(kind, &err);
        self.queue.add_event(Event::new(EventKind::GoToSleep));
    }
}

fn lock(connectivity: &Mutex<ConnectivityManager>) -> MutexGuard<'_, ConnectivityManager> {
    connectivity.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The cycle phase a pipeline event completes.
fn cycle_phase(kind: EventKind) -> Option<CyclePhase> {
    match kind {
        EventKind::TestConnection => Some(CyclePhase::ConnectionTested),
        EventKind::PrintTime => Some(CyclePhase::TimePrinted),
        EventKind::GetSensorData => Some(CyclePhase::SensorDataAcquired),
        EventKind::PublishData => Some(CyclePhase::Published),
        EventKind::ConfigureAccessPoint
        | EventKind::GoToSleep
        | EventKind::ErrorOccurred
        | EventKind::TestDataAcquisition => None,
    }
}

/// The pipeline event expected after `phase`.
fn pending_kind(phase: CyclePhase) -> EventKind {
    match phase {
        CyclePhase::Idle => EventKind::TestConnection,
        CyclePhase::ConnectionTested => EventKind::PrintTime,
        CyclePhase::TimePrinted => EventKind::GetSensorData,
        CyclePhase::SensorDataAcquired => EventKind::PublishData,
        CyclePhase::Published => EventKind::GoToSleep,
    }
}
