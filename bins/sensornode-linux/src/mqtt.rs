//! rumqttc-backed MQTT connector.
//!
//! rumqttc is async; the controller is not. Each session owns a private
//! current-thread runtime and drives the client's event loop only while one
//! of the blocking session calls waits for the packet it needs. Publishes
//! that arrive meanwhile are buffered for `poll_message`.

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, TlsConfiguration,
    Transport,
};
use sensornode_controller::{BrokerOptions, InboundMessage, MqttConnector, MqttError, MqttSession, QoS, TlsMaterial};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 16;

pub struct RumqttConnector {
    /// Bound on every wait for a broker response.
    response_timeout: Duration,
}

impl RumqttConnector {
    pub fn new(response_timeout: Duration) -> Self {
        Self { response_timeout }
    }
}

impl Default for RumqttConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl MqttConnector for RumqttConnector {
    fn connect(&mut self, options: &BrokerOptions) -> Result<Box<dyn MqttSession>, MqttError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MqttError::Connection(format!("failed to build runtime: {}", e)))?;

        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(true);
        if let Some(username) = &options.username {
            mqtt.set_credentials(username, options.password.clone().unwrap_or_default());
        }
        if let Some(tls) = &options.tls {
            mqtt.set_transport(transport(tls)?);
        }

        let (client, eventloop) = AsyncClient::new(mqtt, REQUEST_CHANNEL_CAPACITY);
        let mut session = RumqttSession {
            runtime,
            client,
            eventloop,
            inbox: VecDeque::new(),
            response_timeout: self.response_timeout,
        };

        match session.drive(self.response_timeout, |event| {
            matches!(event, Event::Incoming(Packet::ConnAck(_)))
        }) {
            Ok(true) => {
                debug!("CONNACK from {}:{}", options.host, options.port);
                Ok(Box::new(session))
            }
            Ok(false) => Err(MqttError::Connection(format!(
                "no CONNACK from {}:{} within {:?}",
                options.host, options.port, self.response_timeout
            ))),
            Err(MqttError::Transport(reason)) => Err(MqttError::Connection(reason)),
            Err(e) => Err(e),
        }
    }
}

/// Map PEM material onto a rumqttc transport.
fn transport(tls: &TlsMaterial) -> Result<Transport, MqttError> {
    let client_auth = match (&tls.client_certificate, &tls.client_key) {
        (Some(certificate), Some(key)) => {
            Some((certificate.clone().into_bytes(), key.clone().into_bytes()))
        }
        (None, None) => None,
        _ => {
            return Err(MqttError::Tls(
                "client certificate and key must be given together".to_string(),
            ))
        }
    };

    match (&tls.ca_certificate, client_auth) {
        (Some(ca), client_auth) => Ok(Transport::tls_with_config(TlsConfiguration::Simple {
            ca: ca.clone().into_bytes(),
            alpn: None,
            client_auth,
        })),
        (None, None) => Ok(Transport::tls_with_default_config()),
        // Unreachable for AWS targets, which `CloudTarget::validate` makes carry a CA.
        (None, Some(_)) => Err(MqttError::Tls(
            "a client certificate requires a CA certificate".to_string(),
        )),
    }
}

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
    }
}

fn connection_error(e: ConnectionError) -> MqttError {
    match e {
        ConnectionError::ConnectionRefused(code) => {
            MqttError::Connection(format!("refused by broker: {:?}", code))
        }
        ConnectionError::Tls(e) => MqttError::Tls(e.to_string()),
        other => MqttError::Transport(other.to_string()),
    }
}

pub struct RumqttSession {
    runtime: Runtime,
    client: AsyncClient,
    eventloop: EventLoop,
    inbox: VecDeque<InboundMessage>,
    response_timeout: Duration,
}

impl RumqttSession {
    /// Poll the event loop until `done` accepts an event or `timeout` passes.
    ///
    /// Returns `Ok(false)` on timeout.
    fn drive(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Event) -> bool,
    ) -> Result<bool, MqttError> {
        let Self {
            runtime,
            eventloop,
            inbox,
            ..
        } = self;

        runtime.block_on(async {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let event = match tokio::time::timeout_at(deadline, eventloop.poll()).await {
                    Ok(Ok(event)) => event,
                    Ok(Err(e)) => return Err(connection_error(e)),
                    Err(_) => return Ok(false),
                };
                if let Event::Incoming(Packet::Publish(publish)) = &event {
                    inbox.push_back(InboundMessage::new(
                        publish.topic.clone(),
                        publish.payload.to_vec(),
                    ));
                }
                if done(&event) {
                    return Ok(true);
                }
            }
        })
    }
}

impl MqttSession for RumqttSession {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        self.runtime
            .block_on(self.client.subscribe(topic, to_rumqttc(qos)))
            .map_err(|e| MqttError::Transport(e.to_string()))?;

        let timeout = self.response_timeout;
        if self.drive(timeout, |event| matches!(event, Event::Incoming(Packet::SubAck(_))))? {
            debug!("Subscribed to {}", topic);
            Ok(())
        } else {
            Err(MqttError::Transport(format!("no SUBACK for {}", topic)))
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), MqttError> {
        self.runtime
            .block_on(self.client.publish(topic, to_rumqttc(qos), false, payload.to_vec()))
            .map_err(|e| MqttError::Transport(e.to_string()))?;

        let timeout = self.response_timeout;
        let delivered = self.drive(timeout, |event| match qos {
            QoS::AtMostOnce => matches!(event, Event::Outgoing(Outgoing::Publish(_))),
            QoS::AtLeastOnce => matches!(event, Event::Incoming(Packet::PubAck(_))),
        })?;
        if delivered {
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
        self.drive(timeout, |event| {
            matches!(event, Event::Incoming(Packet::Publish(_)))
        })?;
        Ok(self.inbox.pop_front())
    }

    fn disconnect(&mut self) -> Result<(), MqttError> {
        self.runtime
            .block_on(self.client.disconnect())
            .map_err(|e| MqttError::Transport(e.to_string()))?;

        // The broker closes the socket right after DISCONNECT; errors here are expected.
        if let Err(e) = self.drive(Duration::from_secs(1), |event| {
            matches!(event, Event::Outgoing(Outgoing::Disconnect))
        }) {
            warn!("Error while closing MQTT session: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_requires_complete_client_auth() {
        let partial = TlsMaterial {
            ca_certificate: Some("ca".to_string()),
            client_certificate: Some("cert".to_string()),
            client_key: None,
        };
        assert!(matches!(transport(&partial), Err(MqttError::Tls(_))));

        let no_ca = TlsMaterial {
            ca_certificate: None,
            client_certificate: Some("cert".to_string()),
            client_key: Some("key".to_string()),
        };
        assert!(matches!(transport(&no_ca), Err(MqttError::Tls(_))));
    }

    #[test]
    fn test_tls_with_ca_and_client_auth() {
        let full = TlsMaterial {
            ca_certificate: Some("ca".to_string()),
            client_certificate: Some("cert".to_string()),
            client_key: Some("key".to_string()),
        };
        assert!(matches!(
            transport(&full),
            Ok(Transport::Tls(TlsConfiguration::Simple { client_auth: Some(_), .. }))
        ));
    }

    #[test]
    fn test_unreachable_broker_fails_to_connect() {
        let mut connector = RumqttConnector::new(Duration::from_millis(500));
        let options = BrokerOptions {
            host: "127.0.0.1".to_string(),
            port: 1,
            client_id: "node-1".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            tls: None,
        };
        assert!(matches!(
            connector.connect(&options),
            Err(MqttError::Connection(_))
        ));
    }
}
