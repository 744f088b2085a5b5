//! Broker session seam: connect options, failure codes and the client trait

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::error::Result;

/// Payload published to the status topic while the session is up
pub const PAYLOAD_ONLINE: &str = "online";

/// Last-will payload the broker publishes if the session dies
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Delivery guarantee for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    /// QoS 0
    AtMostOnce,
    /// QoS 1
    AtLeastOnce,
}

/// Broker login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Message the broker publishes on our behalf after an unclean disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
    pub retain: bool,
}

impl LastWill {
    /// Retained QoS 1 `offline` on the status topic
    pub fn offline(status_topic: &str) -> Self {
        Self {
            topic: status_topic.to_string(),
            payload: PAYLOAD_OFFLINE.as_bytes().to_vec(),
            qos: Qos::AtLeastOnce,
            retain: true,
        }
    }
}

/// Everything needed for one connect call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub last_will: Option<LastWill>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl SessionOptions {
    /// Credentials are only sent when a username is configured
    pub fn credentials_from(username: &str, password: &str) -> Option<Credentials> {
        (!username.is_empty()).then(|| Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Why a connect call failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    #[error("connection timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// Broker refused with a CONNACK return code (1-5)
    #[error("refused by broker: {}", refusal_description(.0))]
    Refused(u8),
}

impl ConnectFailure {
    /// Raw failure code as recorded in diagnostics
    ///
    /// `-4` timeout, `-2` network failure, `1..=5` broker refusal.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            ConnectFailure::Timeout => -4,
            ConnectFailure::Network(_) => -2,
            ConnectFailure::Refused(code) => i32::from(*code),
        }
    }
}

/// Human-readable CONNACK refusal
#[must_use]
pub fn refusal_description(code: &u8) -> &'static str {
    match *code {
        1 => "unacceptable protocol version",
        2 => "client identifier rejected",
        3 => "server unavailable",
        4 => "bad username or password",
        5 => "not authorized",
        _ => "unknown reason",
    }
}

/// Application-level connection to the broker
#[async_trait]
pub trait BrokerSession: Send {
    /// Open the session; bounded by `options.connect_timeout`
    async fn connect(&mut self, options: &SessionOptions) -> std::result::Result<(), ConnectFailure>;

    /// Liveness as last observed by the client
    fn is_connected(&self) -> bool;

    /// Queue one message
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<()>;

    /// Pump inbound traffic and keep-alives without blocking for long
    async fn poll(&mut self);

    /// Close the session cleanly
    async fn disconnect(&mut self);
}

/// Creates independent, short-lived sessions
pub trait BrokerConnector: Send {
    type Session: BrokerSession;

    fn open(&self) -> Self::Session;
}
