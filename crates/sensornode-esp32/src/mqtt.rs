//! MQTT over ESP-MQTT.
//!
//! `EspMqttConnection` only delivers events through a blocking `next`, so
//! each session spawns a thread pumping events into a channel. The session
//! waits on that channel with a timeout for the acknowledgement it needs
//! and buffers received publishes for `poll_message`.

use embedded_svc::mqtt::client::{Details, EventPayload, QoS as EspQoS};
use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration};
use esp_idf_svc::tls::X509;
use log::{debug, warn};
use sensornode_controller::{
    BrokerOptions, InboundMessage, MqttConnector, MqttError, MqttSession, QoS, TlsMaterial,
};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const PUMP_STACK_SIZE: usize = 6 * 1024;

#[derive(Debug)]
enum SessionEvent {
    Connected,
    Disconnected,
    Subscribed(u32),
    Published(u32),
    Received(InboundMessage),
    Error(String),
}

pub struct EspMqttConnector {
    response_timeout: Duration,
}

impl EspMqttConnector {
    pub fn new(response_timeout: Duration) -> Self {
        Self { response_timeout }
    }
}

impl Default for EspMqttConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// PEM text as a NUL-terminated certificate with the static lifetime
/// ESP-MQTT requires. The memory is reclaimed by the next deep sleep.
fn leak_pem(pem: &str) -> X509<'static> {
    let mut bytes = pem.as_bytes().to_vec();
    bytes.push(0);
    X509::pem_until_nul(Box::leak(bytes.into_boxed_slice()))
}

fn certificates(
    tls: &TlsMaterial,
) -> Result<(Option<X509<'static>>, Option<X509<'static>>, Option<X509<'static>>), MqttError> {
    match (&tls.client_certificate, &tls.client_key) {
        (Some(_), None) | (None, Some(_)) => Err(MqttError::Tls(
            "client certificate and key must be given together".to_string(),
        )),
        (certificate, key) => Ok((
            tls.ca_certificate.as_deref().map(leak_pem),
            certificate.as_deref().map(leak_pem),
            key.as_deref().map(leak_pem),
        )),
    }
}

fn broker_url(options: &BrokerOptions) -> String {
    let scheme = if options.tls.is_some() { "mqtts" } else { "mqtt" };
    format!("{}://{}:{}", scheme, options.host, options.port)
}

fn pump(mut connection: EspMqttConnection, events: Sender<SessionEvent>) {
    while let Ok(event) = connection.next() {
        let forwarded = match event.payload() {
            EventPayload::Connected(_) => SessionEvent::Connected,
            EventPayload::Disconnected => SessionEvent::Disconnected,
            EventPayload::Subscribed(id) => SessionEvent::Subscribed(id),
            EventPayload::Published(id) => SessionEvent::Published(id),
            EventPayload::Received {
                topic: Some(topic),
                data,
                details: Details::Complete,
                ..
            } => SessionEvent::Received(InboundMessage::new(topic, data)),
            EventPayload::Received { .. } => {
                warn!("Dropping fragmented MQTT message");
                continue;
            }
            EventPayload::Error(e) => SessionEvent::Error(format!("{:?}", e)),
            _ => continue,
        };
        if events.send(forwarded).is_err() {
            break;
        }
    }
    debug!("MQTT event pump finished");
}

impl MqttConnector for EspMqttConnector {
    fn connect(&mut self, options: &BrokerOptions) -> Result<Box<dyn MqttSession>, MqttError> {
        let (server_certificate, client_certificate, private_key) = match &options.tls {
            Some(tls) => certificates(tls)?,
            None => (None, None, None),
        };
        let use_bundle = options.tls.is_some() && server_certificate.is_none();

        let conf = MqttClientConfiguration {
            client_id: Some(options.client_id.as_str()),
            username: options.username.as_deref(),
            password: options.password.as_deref(),
            keep_alive_interval: Some(options.keep_alive),
            server_certificate,
            client_certificate,
            private_key,
            crt_bundle_attach: if use_bundle {
                Some(esp_idf_svc::sys::esp_crt_bundle_attach)
            } else {
                None
            },
            ..Default::default()
        };

        let url = broker_url(options);
        let (client, connection) = EspMqttClient::new(&url, &conf)
            .map_err(|e| MqttError::Connection(format!("{}: {}", url, e)))?;

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("mqtt-events".to_string())
            .stack_size(PUMP_STACK_SIZE)
            .spawn(move || pump(connection, tx))
            .map_err(|e| MqttError::Connection(format!("failed to spawn event pump: {}", e)))?;

        let mut session = EspMqttSession {
            client,
            events: rx,
            inbox: VecDeque::new(),
            response_timeout: self.response_timeout,
        };
        match session.wait_for(self.response_timeout, |e| matches!(e, SessionEvent::Connected)) {
            Ok(true) => {
                debug!("Connected to {}", url);
                Ok(Box::new(session))
            }
            Ok(false) => Err(MqttError::Connection(format!(
                "no CONNACK from {} within {:?}",
                url, self.response_timeout
            ))),
            Err(MqttError::Transport(reason)) => Err(MqttError::Connection(reason)),
            Err(e) => Err(e),
        }
    }
}

fn to_esp(qos: QoS) -> EspQoS {
    match qos {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
    }
}

pub struct EspMqttSession {
    client: EspMqttClient<'static>,
    events: Receiver<SessionEvent>,
    inbox: VecDeque<InboundMessage>,
    response_timeout: Duration,
}

impl EspMqttSession {
    /// Consume events until `done` accepts one or `timeout` passes.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_for(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&SessionEvent) -> bool,
    ) -> Result<bool, MqttError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.events.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MqttError::Transport("MQTT connection closed".to_string()))
                }
            };
            let accepted = done(&event);
            match event {
                SessionEvent::Received(message) => self.inbox.push_back(message),
                SessionEvent::Disconnected if !accepted => {
                    return Err(MqttError::Transport("disconnected by broker".to_string()))
                }
                SessionEvent::Error(e) if !accepted => return Err(MqttError::Transport(e)),
                _ => {}
            }
            if accepted {
                return Ok(true);
            }
        }
    }
}

impl MqttSession for EspMqttSession {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        let id = self
            .client
            .subscribe(topic, to_esp(qos))
            .map_err(|e| MqttError::Transport(e.to_string()))?;

        let timeout = self.response_timeout;
        if self.wait_for(timeout, |e| matches!(e, SessionEvent::Subscribed(acked) if *acked == id))? {
            debug!("Subscribed to {}", topic);
            Ok(())
        } else {
            Err(MqttError::Transport(format!("no SUBACK for {}", topic)))
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), MqttError> {
        let id = self
            .client
            .publish(topic, to_esp(qos), false, payload)
            .map_err(|e| MqttError::Transport(e.to_string()))?;
        // ESP-MQTT reports no event for QoS 0; a successful enqueue is all there is.
        if qos == QoS::AtMostOnce {
            return Ok(());
        }

        let timeout = self.response_timeout;
        if self.wait_for(timeout, |e| matches!(e, SessionEvent::Published(acked) if *acked == id))? {
            Ok(())
        } else {
            Err(MqttError::Transport(format!(
                "publish to {} not confirmed within {:?}",
                topic, timeout
            )))
        }
    }

    fn poll_message(&mut self, timeout: Duration) -> Result<Option<InboundMessage>, MqttError> {
        if let Some(message) = self.inbox.pop_front() {
            return Ok(Some(message));
        }
        self.wait_for(timeout, |e| matches!(e, SessionEvent::Received(_)))
            .map(|_| ())?;
        Ok(self.inbox.pop_front())
    }

    fn disconnect(&mut self) -> Result<(), MqttError> {
        // ESP-MQTT disconnects when the client is dropped, which also ends the pump.
        let pending = self.events.try_iter().count();
        debug!("Closing MQTT session ({} events discarded)", pending);
        Ok(())
    }
}
