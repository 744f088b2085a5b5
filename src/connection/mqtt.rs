//! MQTT 3.1.1 broker session on `rumqttc`

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::session::{BrokerConnector, BrokerSession, ConnectFailure, Qos, SessionOptions};
use crate::error::{Result, TankBridgeError};

/// Outgoing request queue depth
const REQUEST_CAPACITY: usize = 32;

/// Upper bound for one event loop poll inside `poll()`
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Events handled per `poll()` call
const POLL_BUDGET: usize = 32;

/// Time allowed to flush queued messages on disconnect
const DISCONNECT_DRAIN: Duration = Duration::from_secs(1);

/// Smallest keep-alive rumqttc accepts
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

fn qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// CONNACK return code as its MQTT 3.1.1 wire value
fn refusal_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

fn mqtt_options(options: &SessionOptions) -> MqttOptions {
    let mut opts = MqttOptions::new(&options.client_id, &options.host, options.port);
    opts.set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE));
    opts.set_clean_session(true);
    if let Some(creds) = &options.credentials {
        opts.set_credentials(&creds.username, &creds.password);
    }
    if let Some(will) = &options.last_will {
        opts.set_last_will(rumqttc::LastWill::new(
            &will.topic,
            will.payload.clone(),
            qos(will.qos),
            will.retain,
        ));
    }
    opts
}

/// Wait for the broker's CONNACK
async fn await_connack(eventloop: &mut EventLoop) -> std::result::Result<(), ConnectFailure> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(ConnectFailure::Refused(refusal_code(code))),
                };
            }
            Ok(event) => debug!("Before CONNACK: {:?}", event),
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(ConnectFailure::Refused(refusal_code(code)));
            }
            Err(e) => return Err(ConnectFailure::Network(e.to_string())),
        }
    }
}

/// One client plus its event loop
#[derive(Default)]
pub struct RumqttSession {
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    connected: bool,
}

impl RumqttSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_client(&mut self) {
        self.client = None;
        self.eventloop = None;
        self.connected = false;
    }
}

#[async_trait]
impl BrokerSession for RumqttSession {
    async fn connect(&mut self, options: &SessionOptions) -> std::result::Result<(), ConnectFailure> {
        self.drop_client();

        let (client, mut eventloop) = AsyncClient::new(mqtt_options(options), REQUEST_CAPACITY);
        let result = match timeout(options.connect_timeout, await_connack(&mut eventloop)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectFailure::Timeout),
        };

        if result.is_ok() {
            self.client = Some(client);
            self.eventloop = Some(eventloop);
            self.connected = true;
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos_level: Qos, retain: bool) -> Result<()> {
        let client = self.client.as_ref().ok_or(TankBridgeError::TransportUnavailable(
            "no broker client",
        ))?;
        client
            .try_publish(topic, qos(qos_level), retain, payload.to_vec())
            .map_err(|e| TankBridgeError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn poll(&mut self) {
        let Some(eventloop) = self.eventloop.as_mut() else {
            return;
        };

        let mut failure = None;
        for _ in 0..POLL_BUDGET {
            match timeout(POLL_SLICE, eventloop.poll()).await {
                Ok(Ok(event)) => debug!("MQTT event: {:?}", event),
                Ok(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                Err(_) => break,
            }
        }

        if let Some(e) = failure {
            warn!("MQTT connection error: {}", e);
            self.drop_client();
        }
    }

    async fn disconnect(&mut self) {
        if let (Some(client), Some(eventloop)) = (self.client.as_ref(), self.eventloop.as_mut()) {
            if let Err(e) = client.try_disconnect() {
                debug!("MQTT disconnect request failed: {}", e);
            } else {
                // Flush queued publishes and the DISCONNECT packet
                let _ = timeout(DISCONNECT_DRAIN, async {
                    while eventloop.poll().await.is_ok() {}
                })
                .await;
            }
        }
        self.drop_client();
    }
}

/// Opens a fresh [`RumqttSession`] per call
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttConnector;

impl BrokerConnector for RumqttConnector {
    type Session = RumqttSession;

    fn open(&self) -> RumqttSession {
        RumqttSession::new()
    }
}
