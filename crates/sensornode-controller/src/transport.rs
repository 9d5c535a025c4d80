//! Telemetry transport.
//!
//! Publishes one measurement envelope to the configured cloud:
//!
//! 1. Encode the envelope in the cloud's wire format
//! 2. Connect to the broker (missing material is a configuration error)
//! 3. Run the optional remote settings handshake
//! 4. Subscribe to delivery status topics where the cloud has them
//! 5. Publish, retrying transport failures up to `max_retries` times
//! 6. Disconnect, on success and on failure
//!
//! Retries are immediate. An answer on the cloud's error topic is an
//! application-level rejection and is never retried.

use crate::adapter::{CloudAdapterHandle, Handshake};
use crate::connectivity::ConnectivityManager;
use crate::error::{MqttError, TransportError};
use crate::mqtt::{InboundMessage, MqttConnector, MqttSession, QoS};
use sensornode_core::{Credential, MeasurementEnvelope};
use sensornode_protocol::{codec, topics, AckOutcome};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// ThingsBoard `SleepTime` values below this (seconds) are ignored.
pub const MIN_REMOTE_SLEEP_TIME_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Retries after the first failed send.
    pub max_retries: u32,
    /// How long to wait for a delivery status after publishing.
    pub ack_timeout: Duration,
    /// How long to wait for a handshake response.
    pub handshake_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ack_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sends issued, including the successful one.
    pub attempts: u32,
    /// True when the cloud confirmed delivery on its status topic.
    pub acknowledged: bool,
    /// Publishing period assigned by the cloud during the handshake.
    pub publish_period_ms: Option<i64>,
}

/// Why a single publish attempt failed.
enum AttemptError {
    Transport(MqttError),
    Rejected(String),
}

pub struct TelemetryTransport {
    connector: Box<dyn MqttConnector>,
    settings: TransportSettings,
}

impl TelemetryTransport {
    pub fn new(connector: Box<dyn MqttConnector>, settings: TransportSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Join a network, publish, and release the network link again.
    pub fn deliver(
        &mut self,
        connectivity: &mut ConnectivityManager,
        credentials: &[Credential],
        handle: &CloudAdapterHandle,
        envelope: &MeasurementEnvelope,
        qos: QoS,
    ) -> Result<PublishReport, TransportError> {
        connectivity.connect_station(credentials)?;
        let result = self.publish(handle, envelope, qos);
        connectivity.disconnect_station();
        result
    }

    /// Publish `envelope` over an already established network link.
    pub fn publish(
        &mut self,
        handle: &CloudAdapterHandle,
        envelope: &MeasurementEnvelope,
        qos: QoS,
    ) -> Result<PublishReport, TransportError> {
        let payload = handle.encode(envelope)?;
        debug!(
            "Encoded {} bytes for {} topic {}",
            payload.len(),
            handle.target(),
            handle.data_topic()
        );

        let mut session = self
            .connector
            .connect(handle.broker())
            .map_err(TransportError::Connect)?;
        info!(
            "Connected to {} broker {}:{}",
            handle.target(),
            handle.broker().host,
            handle.broker().port
        );

        let result = self.run_session(session.as_mut(), handle, &payload, qos);
        if let Err(e) = session.disconnect() {
            warn!("Disconnect from {} failed: {}", handle.target(), e);
        }
        result
    }

    /// Check that the broker accepts a connection.
    pub fn check_connection(&mut self, handle: &CloudAdapterHandle) -> Result<(), TransportError> {
        let mut session = self
            .connector
            .connect(handle.broker())
            .map_err(TransportError::Connect)?;
        info!("Connection to {} verified", handle.target());
        if let Err(e) = session.disconnect() {
            warn!("Disconnect from {} failed: {}", handle.target(), e);
        }
        Ok(())
    }

    fn run_session(
        &self,
        session: &mut dyn MqttSession,
        handle: &CloudAdapterHandle,
        payload: &[u8],
        qos: QoS,
    ) -> Result<PublishReport, TransportError> {
        let mut report = PublishReport::default();

        if let Some(handshake) = handle.handshake() {
            report.publish_period_ms = self.handshake(session, handshake, qos);
        }

        if let Some(ack) = handle.ack_topics() {
            for topic in [&ack.status, &ack.error] {
                if let Err(e) = session.subscribe(topic, qos) {
                    error!("Failed to subscribe to {}: {}", topic, e);
                }
            }
        }

        let max_attempts = self.settings.max_retries + 1;
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            report.attempts = attempt;
            match self.attempt(session, handle, payload, qos) {
                Ok(acknowledged) => {
                    report.acknowledged = acknowledged;
                    info!(
                        target_cloud = handle.target(),
                        attempt,
                        acknowledged,
                        "Measurement published"
                    );
                    return Ok(report);
                }
                Err(AttemptError::Rejected(reason)) => {
                    error!("{} rejected the measurement: {}", handle.target(), reason);
                    return Err(TransportError::Rejected(reason));
                }
                Err(AttemptError::Transport(MqttError::OutOfMemory)) => {
                    error!("Out of memory while publishing to {}", handle.target());
                    return Err(TransportError::Mqtt(MqttError::OutOfMemory));
                }
                Err(AttemptError::Transport(e)) => {
                    warn!(
                        target_cloud = handle.target(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let last = last_error.unwrap_or_else(|| MqttError::Transport("no attempt made".to_string()));
        error!(
            "Giving up on {} after {} attempts",
            handle.target(),
            max_attempts
        );
        Err(TransportError::RetriesExhausted {
            attempts: max_attempts,
            last,
        })
    }

    /// One send, followed by the delivery status wait where supported.
    fn attempt(
        &self,
        session: &mut dyn MqttSession,
        handle: &CloudAdapterHandle,
        payload: &[u8],
        qos: QoS,
    ) -> Result<bool, AttemptError> {
        session
            .publish(handle.data_topic(), payload, qos)
            .map_err(AttemptError::Transport)?;

        let Some(ack) = handle.ack_topics() else {
            return Ok(false);
        };

        let deadline = Instant::now() + self.settings.ack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = session
                .poll_message(remaining)
                .map_err(AttemptError::Transport)?;
            match message {
                Some(InboundMessage { topic, payload }) if topic == ack.status || topic == ack.error => {
                    return match codec::decode_delivery_status(topic == ack.error, &payload) {
                        AckOutcome::Accepted => Ok(true),
                        AckOutcome::Rejected(reason) => Err(AttemptError::Rejected(reason)),
                    };
                }
                Some(other) => {
                    debug!("Ignoring message on {}", other.topic);
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                }
                None => {
                    debug!("No delivery status from {} within timeout", handle.target());
                    return Ok(false);
                }
            }
        }
    }

    /// Exchange remote settings. Failures only skip the update.
    fn handshake(
        &self,
        session: &mut dyn MqttSession,
        handshake: &Handshake,
        qos: QoS,
    ) -> Option<i64> {
        let (request, response_filter, body) = match handshake {
            Handshake::AwsShadow { request, response } => {
                (request.as_str(), response.as_str(), Vec::new())
            }
            Handshake::ThingsBoardSleepTime => match codec::encode_sleep_time_request() {
                Ok(body) => (
                    topics::THINGSBOARD_ATTRIBUTE_REQUEST,
                    topics::THINGSBOARD_ATTRIBUTE_RESPONSE,
                    body,
                ),
                Err(e) => {
                    warn!("Failed to encode attribute request: {}", e);
                    return None;
                }
            },
        };

        if let Err(e) = session.subscribe(response_filter, qos) {
            warn!("Handshake subscribe failed: {}", e);
            return None;
        }
        if let Err(e) = session.publish(request, &body, qos) {
            warn!("Handshake request failed: {}", e);
            return None;
        }

        let response = self.wait_for(session, response_filter, self.settings.handshake_timeout)?;
        let period = match handshake {
            Handshake::AwsShadow { .. } => match codec::decode_shadow_period_ms(&response) {
                Ok(Some(period)) if period > 0 => Some(period),
                Ok(_) => None,
                Err(e) => {
                    warn!("Malformed shadow document: {}", e);
                    None
                }
            },
            Handshake::ThingsBoardSleepTime => match codec::decode_sleep_time_secs(&response) {
                Ok(Some(secs)) if secs >= MIN_REMOTE_SLEEP_TIME_SECS => Some(secs * 1000),
                Ok(Some(secs)) => {
                    debug!("Ignoring SleepTime of {} s", secs);
                    None
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Malformed attribute response: {}", e);
                    None
                }
            },
        };

        if let Some(period) = period {
            info!("Cloud assigned a publishing period of {} ms", period);
        }
        period
    }

    fn wait_for(
        &self,
        session: &mut dyn MqttSession,
        filter: &str,
        timeout: Duration,
    ) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match session.poll_message(remaining) {
                Ok(Some(message)) if topics::topic_matches(filter, &message.topic) => {
                    return Some(message.payload);
                }
                Ok(Some(_)) if !remaining.is_zero() => continue,
                Ok(_) => {
                    debug!("No handshake response on {}", filter);
                    return None;
                }
                Err(e) => {
                    warn!("Handshake wait failed: {}", e);
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensornode_core::{
        CloudTarget, DeviceConfig, KaaSettings, MeasurementPayload, Sample, ThingsBoardSettings,
    };
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct BrokerLog {
        connects: u32,
        disconnects: u32,
        publishes: Vec<String>,
        subscriptions: Vec<String>,
    }

    /// Broker fake: scripted publish results and inbound messages.
    struct FakeBroker {
        log: Arc<Mutex<BrokerLog>>,
        publish_results: Arc<Mutex<VecDeque<Result<(), MqttError>>>>,
        inbound: Arc<Mutex<VecDeque<InboundMessage>>>,
    }

    struct FakeSession {
        log: Arc<Mutex<BrokerLog>>,
        publish_results: Arc<Mutex<VecDeque<Result<(), MqttError>>>>,
        inbound: Arc<Mutex<VecDeque<InboundMessage>>>,
    }

    impl MqttConnector for FakeBroker {
        fn connect(&mut self, _options: &crate::mqtt::BrokerOptions) -> Result<Box<dyn MqttSession>, MqttError> {
            self.log.lock().unwrap().connects += 1;
            Ok(Box::new(FakeSession {
                log: self.log.clone(),
                publish_results: self.publish_results.clone(),
                inbound: self.inbound.clone(),
            }))
        }
    }

    impl MqttSession for FakeSession {
        fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), MqttError> {
            self.log.lock().unwrap().subscriptions.push(topic.to_string());
            Ok(())
        }

        fn publish(&mut self, topic: &str, _payload: &[u8], _qos: QoS) -> Result<(), MqttError> {
            self.log.lock().unwrap().publishes.push(topic.to_string());
            self.publish_results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        fn poll_message(&mut self, _timeout: Duration) -> Result<Option<InboundMessage>, MqttError> {
            Ok(self.inbound.lock().unwrap().pop_front())
        }

        fn disconnect(&mut self) -> Result<(), MqttError> {
            self.log.lock().unwrap().disconnects += 1;
            Ok(())
        }
    }

    struct Fixture {
        transport: TelemetryTransport,
        log: Arc<Mutex<BrokerLog>>,
        publish_results: Arc<Mutex<VecDeque<Result<(), MqttError>>>>,
        inbound: Arc<Mutex<VecDeque<InboundMessage>>>,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(Mutex::new(BrokerLog::default()));
        let publish_results = Arc::new(Mutex::new(VecDeque::new()));
        let inbound = Arc::new(Mutex::new(VecDeque::new()));
        let broker = FakeBroker {
            log: log.clone(),
            publish_results: publish_results.clone(),
            inbound: inbound.clone(),
        };
        Fixture {
            transport: TelemetryTransport::new(Box::new(broker), TransportSettings::default()),
            log,
            publish_results,
            inbound,
        }
    }

    fn envelope() -> MeasurementEnvelope {
        let mut payload = MeasurementPayload::new();
        payload.insert(
            "temperature".to_string(),
            vec![Sample::from_f64(1000, 21.5).unwrap()],
        );
        MeasurementEnvelope::new("node-1", 2000, payload)
    }

    fn handle(cloud: CloudTarget) -> CloudAdapterHandle {
        let config = DeviceConfig {
            cloud: Some(cloud),
            ..Default::default()
        };
        CloudAdapterHandle::from_config(&config).unwrap()
    }

    fn thingsboard() -> CloudAdapterHandle {
        handle(CloudTarget::ThingsBoard(ThingsBoardSettings {
            host: "demo.thingsboard.io".to_string(),
            access_token: "TOKEN".to_string(),
            ..Default::default()
        }))
    }

    fn kaa() -> CloudAdapterHandle {
        handle(CloudTarget::Kaa(KaaSettings {
            app_version: "app".to_string(),
            endpoint_token: "ep".to_string(),
            ..Default::default()
        }))
    }

    fn fail() -> Result<(), MqttError> {
        Err(MqttError::Transport("connection reset".to_string()))
    }

    fn data_publishes(log: &BrokerLog, topic: &str) -> usize {
        log.publishes.iter().filter(|t| *t == topic).count()
    }

    #[test]
    fn test_retries_then_succeeds() {
        for failures in 0..=3u32 {
            let mut fx = fixture();
            // Handshake request consumes the first scripted result.
            fx.publish_results.lock().unwrap().push_back(Ok(()));
            for _ in 0..failures {
                fx.publish_results.lock().unwrap().push_back(fail());
            }

            let report = fx
                .transport
                .publish(&thingsboard(), &envelope(), QoS::AtLeastOnce)
                .unwrap();
            assert_eq!(report.attempts, failures + 1);

            let log = fx.log.lock().unwrap();
            assert_eq!(data_publishes(&log, "v1/devices/me/telemetry"), failures as usize + 1);
            assert_eq!(log.disconnects, 1);
        }
    }

    #[test]
    fn test_gives_up_after_three_retries() {
        let mut fx = fixture();
        fx.publish_results.lock().unwrap().push_back(Ok(()));
        for _ in 0..4 {
            fx.publish_results.lock().unwrap().push_back(fail());
        }

        let err = fx
            .transport
            .publish(&thingsboard(), &envelope(), QoS::AtLeastOnce)
            .unwrap_err();
        assert!(matches!(err, TransportError::RetriesExhausted { attempts: 4, .. }));

        let log = fx.log.lock().unwrap();
        assert_eq!(data_publishes(&log, "v1/devices/me/telemetry"), 4);
        assert_eq!(log.connects, 1);
        assert_eq!(log.disconnects, 1);
    }

    #[test]
    fn test_thingsboard_sleep_time_handshake() {
        let mut fx = fixture();
        fx.inbound.lock().unwrap().push_back(InboundMessage::new(
            "v1/devices/me/attributes/response/1",
            br#"{"shared":{"SleepTime":300}}"#.to_vec(),
        ));

        let report = fx
            .transport
            .publish(&thingsboard(), &envelope(), QoS::AtLeastOnce)
            .unwrap();
        assert_eq!(report.publish_period_ms, Some(300_000));
        assert_eq!(
            fx.log.lock().unwrap().publishes[0],
            "v1/devices/me/attributes/request/1"
        );
    }

    #[test]
    fn test_short_sleep_time_ignored() {
        let mut fx = fixture();
        fx.inbound.lock().unwrap().push_back(InboundMessage::new(
            "v1/devices/me/attributes/response/1",
            br#"{"shared":{"SleepTime":10}}"#.to_vec(),
        ));

        let report = fx
            .transport
            .publish(&thingsboard(), &envelope(), QoS::AtLeastOnce)
            .unwrap();
        assert_eq!(report.publish_period_ms, None);
    }

    #[test]
    fn test_malformed_handshake_is_not_fatal() {
        let mut fx = fixture();
        fx.inbound.lock().unwrap().push_back(InboundMessage::new(
            "v1/devices/me/attributes/response/1",
            b"not json".to_vec(),
        ));

        let report = fx
            .transport
            .publish(&thingsboard(), &envelope(), QoS::AtLeastOnce)
            .unwrap();
        assert_eq!(report.publish_period_ms, None);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_kaa_status_acknowledges() {
        let mut fx = fixture();
        fx.inbound.lock().unwrap().push_back(InboundMessage::new(
            "kp1/app/dcx/ep/json/42/status",
            br#"{"statusCode":200}"#.to_vec(),
        ));

        let report = fx.transport.publish(&kaa(), &envelope(), QoS::AtLeastOnce).unwrap();
        assert!(report.acknowledged);
        assert_eq!(
            fx.log.lock().unwrap().subscriptions,
            vec![
                "kp1/app/dcx/ep/json/42/status".to_string(),
                "kp1/app/dcx/ep/json/42/error".to_string()
            ]
        );
    }

    #[test]
    fn test_kaa_rejection_not_retried() {
        let mut fx = fixture();
        fx.inbound.lock().unwrap().push_back(InboundMessage::new(
            "kp1/app/dcx/ep/json/42/error",
            br#"{"statusCode":400,"reasonPhrase":"Invalid payload"}"#.to_vec(),
        ));

        let err = fx.transport.publish(&kaa(), &envelope(), QoS::AtLeastOnce).unwrap_err();
        assert!(matches!(err, TransportError::Rejected(ref reason) if reason == "Invalid payload"));

        let log = fx.log.lock().unwrap();
        assert_eq!(log.publishes.len(), 1);
        assert_eq!(log.disconnects, 1);
    }

    #[test]
    fn test_silence_counts_as_delivered() {
        let mut fx = fixture();
        let report = fx.transport.publish(&kaa(), &envelope(), QoS::AtMostOnce).unwrap();
        assert!(!report.acknowledged);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_out_of_memory_not_retried() {
        let mut fx = fixture();
        fx.publish_results
            .lock()
            .unwrap()
            .push_back(Err(MqttError::OutOfMemory));

        let err = fx.transport.publish(&kaa(), &envelope(), QoS::AtLeastOnce).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::ResourceExhaustion);
        assert_eq!(fx.log.lock().unwrap().publishes.len(), 1);
    }

    #[test]
    fn test_empty_envelope_never_connects() {
        let mut fx = fixture();
        let empty = MeasurementEnvelope::new("node-1", 0, MeasurementPayload::new());

        let err = fx.transport.publish(&kaa(), &empty, QoS::AtLeastOnce).unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
        assert_eq!(fx.log.lock().unwrap().connects, 0);
    }
}
