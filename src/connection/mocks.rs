//! Scriptable radio and broker doubles shared by the crate's tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::radio::{DisconnectReason, LinkEvent, LinkStatus, Radio, RadioMode};
use super::session::{BrokerConnector, BrokerSession, ConnectFailure, Qos, SessionOptions};
use super::{ConnectionManager, ConnectionSettings};
use crate::config::Config;
use crate::error::{Result, TankBridgeError};
use tokio::time::{Duration, Instant};

/// Mock radio
///
/// Each `begin_connect` pops the next scripted outcome: `Some(event)` is
/// queued immediately and reflected in `status()`, `None` leaves the attempt
/// hanging. With the script empty, attempts hang.
#[derive(Clone)]
pub struct MockRadio {
    events: UnboundedSender<LinkEvent>,
    pub outcomes: Arc<Mutex<VecDeque<Option<LinkEvent>>>>,
    pub connects: Arc<Mutex<Vec<String>>>,
    pub disconnects: Arc<Mutex<u32>>,
    pub modes: Arc<Mutex<Vec<RadioMode>>>,
    pub status: Arc<Mutex<LinkStatus>>,
    pub rssi: Arc<Mutex<Option<i32>>>,
}

impl MockRadio {
    pub fn new() -> (Self, UnboundedReceiver<LinkEvent>) {
        let (events, rx) = unbounded_channel();
        let radio = Self {
            events,
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            connects: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(Mutex::new(0)),
            modes: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new(LinkStatus::Idle)),
            rssi: Arc::new(Mutex::new(Some(-61))),
        };
        (radio, rx)
    }

    pub fn script(&self, outcome: Option<LinkEvent>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Queue a notification as if the network stack raised it
    pub fn notify(&self, event: LinkEvent) {
        self.apply(event);
        self.events.send(event).unwrap();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn mode(&self) -> Option<RadioMode> {
        self.modes.lock().unwrap().last().copied()
    }

    fn apply(&self, event: LinkEvent) {
        *self.status.lock().unwrap() = match event {
            LinkEvent::AddressAcquired(addr) => LinkStatus::Connected(addr),
            LinkEvent::Disconnected(DisconnectReason::NoNetwork) => LinkStatus::NoSsidAvailable,
            LinkEvent::Disconnected(DisconnectReason::AuthFailed) => LinkStatus::ConnectFailed,
            LinkEvent::Disconnected(DisconnectReason::ConnectionLost) => LinkStatus::ConnectionLost,
            LinkEvent::Disconnected(DisconnectReason::Other) => LinkStatus::Disconnected,
        };
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn set_mode(&mut self, mode: RadioMode) -> Result<()> {
        self.modes.lock().unwrap().push(mode);
        Ok(())
    }

    async fn begin_connect(&mut self, ssid: &str, _password: &str) -> Result<()> {
        self.connects.lock().unwrap().push(ssid.to_string());
        let outcome = self.outcomes.lock().unwrap().pop_front().flatten();
        if let Some(event) = outcome {
            self.notify(event);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.disconnects.lock().unwrap() += 1;
        *self.status.lock().unwrap() = LinkStatus::Disconnected;
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        *self.status.lock().unwrap()
    }

    async fn poll(&mut self) {}

    fn rssi(&self) -> Option<i32> {
        *self.rssi.lock().unwrap()
    }

    fn local_address(&self) -> Option<IpAddr> {
        match *self.status.lock().unwrap() {
            LinkStatus::Connected(addr) => Some(addr),
            _ => None,
        }
    }
}

/// One message seen by [`MockSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
    pub retain: bool,
}

/// Mock broker session; clones share all state
#[derive(Clone, Default)]
pub struct MockSession {
    pub connect_results: Arc<Mutex<VecDeque<std::result::Result<(), ConnectFailure>>>>,
    pub connect_calls: Arc<Mutex<Vec<SessionOptions>>>,
    pub published: Arc<Mutex<Vec<Published>>>,
    pub alive: Arc<Mutex<bool>>,
    pub fail_publish: Arc<Mutex<bool>>,
    pub disconnects: Arc<Mutex<u32>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, result: std::result::Result<(), ConnectFailure>) {
        self.connect_results.lock().unwrap().push_back(result);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    /// Simulate the broker dropping the session
    pub fn drop_session(&self) {
        *self.alive.lock().unwrap() = false;
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn connect(&mut self, options: &SessionOptions) -> std::result::Result<(), ConnectFailure> {
        self.connect_calls.lock().unwrap().push(options.clone());
        let result = self.connect_results.lock().unwrap().pop_front().unwrap_or(Ok(()));
        *self.alive.lock().unwrap() = result.is_ok();
        result
    }

    fn is_connected(&self) -> bool {
        *self.alive.lock().unwrap()
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<()> {
        if *self.fail_publish.lock().unwrap() {
            return Err(TankBridgeError::Publish {
                topic: topic.to_string(),
                reason: "mock publish failure".to_string(),
            });
        }
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn poll(&mut self) {}

    async fn disconnect(&mut self) {
        *self.disconnects.lock().unwrap() += 1;
        *self.alive.lock().unwrap() = false;
    }
}

/// Hands out clones of one [`MockSession`] and counts them
#[derive(Clone, Default)]
pub struct MockConnector {
    pub session: MockSession,
    pub opened: Arc<Mutex<u32>>,
}

impl MockConnector {
    pub fn opened(&self) -> u32 {
        *self.opened.lock().unwrap()
    }
}

impl BrokerConnector for MockConnector {
    type Session = MockSession;

    fn open(&self) -> MockSession {
        *self.opened.lock().unwrap() += 1;
        self.session.clone()
    }
}

pub type MockManager = ConnectionManager<MockRadio, MockSession>;

/// Config with a network and broker set, client id `t1`
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.device.client_id = "t1".to_string();
    config.wifi.ssid = "tanknet".to_string();
    config.wifi.password = "hunter22".to_string();
    config.mqtt.host = "broker.local".to_string();
    config.sanitize();
    config
}

/// Manager with link and session up; the `online` message is already published
pub async fn connected_manager() -> (MockManager, MockRadio, MockSession) {
    let (radio, events) = MockRadio::new();
    let session = MockSession::new();
    let mut manager = ConnectionManager::new(
        radio.clone(),
        session.clone(),
        events,
        ConnectionSettings::from_config(&test_config()),
    );

    radio.script(Some(LinkEvent::AddressAcquired("192.168.1.40".parse().unwrap())));
    let now = Instant::now();
    manager.pump(now).await;
    manager.tick(now).await;
    let later = now + Duration::from_millis(100);
    manager.pump(later).await;
    manager.tick(later).await;
    assert!(manager.is_transport_ready());

    (manager, radio, session)
}
