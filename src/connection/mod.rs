//! # Connection Management
//!
//! Keeps the Wi-Fi link and the broker session up using two polled state
//! machines driven from the control loop.
//!
//! ## Link
//!
//! ```text
//! Idle / Backoff(expired) --begin_connect--> Connecting (15 s deadline)
//! Connecting --AddressAcquired--> Connected
//! Connecting --Disconnected / deadline--> Backoff (3 s)
//! Connected --Disconnected--> Backoff (3 s)
//! any --park_link--> Parked --resume_link--> Backoff (3 s)
//! ```
//!
//! An address notification only counts while an attempt is outstanding.
//!
//! ## Session
//!
//! Only advances while the link is connected.
//!
//! ```text
//! Disconnected / Backoff(expired) --connect ok--> Connected (publishes "online")
//! Disconnected / Backoff(expired) --connect err--> Backoff (5 s)
//! Connected --liveness lost--> Disconnected
//! ```
//!
//! Link notifications arrive on an mpsc queue owned by the radio driver and
//! are drained by [`ConnectionManager::pump`].

pub mod mqtt;
pub mod nmcli;
pub mod radio;
pub mod session;

#[cfg(test)]
pub mod mocks;

use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, TankBridgeError};
use radio::{LinkEvent, Radio, RadioLease};
use session::{BrokerSession, LastWill, Qos, SessionOptions, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};

/// How long one link attempt may stay outstanding
pub const LINK_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay before retrying the link after a failure
pub const LINK_BACKOFF: Duration = Duration::from_secs(3);

/// Delay before retrying the broker session after a failure
pub const SESSION_BACKOFF: Duration = Duration::from_secs(5);

/// Network link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting { deadline: Instant },
    Connected,
    Backoff { until: Instant },
    /// No attempts while the setup access point holds the radio
    Parked,
}

/// Broker session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { until: Instant },
}

/// Emitted by [`ConnectionManager::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Session came up and `online` was published
    SessionEstablished,
}

/// What the manager connects to
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub ssid: String,
    pub password: String,
    pub status_topic: String,
    pub session: SessionOptions,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ssid: config.wifi.ssid.clone(),
            password: config.wifi.password.clone(),
            status_topic: config.mqtt.status_topic.clone(),
            session: SessionOptions {
                host: config.mqtt.host.clone(),
                port: config.mqtt.port,
                client_id: config.device.client_id.clone(),
                credentials: SessionOptions::credentials_from(
                    &config.mqtt.username,
                    &config.mqtt.password,
                ),
                last_will: Some(LastWill::offline(&config.mqtt.status_topic)),
                keep_alive: Duration::from_secs(u64::from(config.mqtt.keep_alive_s)),
                connect_timeout: Duration::from_millis(config.mqtt.connect_timeout_ms),
            },
        }
    }
}

/// Owns the radio and the broker session
pub struct ConnectionManager<R, S> {
    radio: R,
    session: S,
    events: UnboundedReceiver<LinkEvent>,
    settings: ConnectionSettings,
    link: LinkState,
    session_state: SessionState,
    auth_failures: u32,
    warned_unconfigured: bool,
}

impl<R: Radio, S: BrokerSession> ConnectionManager<R, S> {
    /// Create a manager; `events` must be the receiver paired with the
    /// sender the radio reports link changes on
    pub fn new(
        radio: R,
        session: S,
        events: UnboundedReceiver<LinkEvent>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            radio,
            session,
            events,
            settings,
            link: LinkState::Idle,
            session_state: SessionState::Disconnected,
            auth_failures: 0,
            warned_unconfigured: false,
        }
    }

    /// Service the radio and session, then apply queued link notifications
    pub async fn pump(&mut self, now: Instant) {
        self.radio.poll().await;
        while let Ok(event) = self.events.try_recv() {
            self.handle_link_event(event, now);
        }
        if self.session_state == SessionState::Connected {
            self.session.poll().await;
        }
    }

    /// Advance both machines by at most one attempt each
    pub async fn tick(&mut self, now: Instant) -> Option<ConnectionEvent> {
        self.tick_link(now).await;
        self.tick_session(now).await
    }

    pub fn is_transport_ready(&self) -> bool {
        self.link == LinkState::Connected
            && self.session_state == SessionState::Connected
            && self.session.is_connected()
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    /// Consecutive authentication-class link failures
    ///
    /// Reset by an acquired address or any other kind of failure.
    pub fn consecutive_auth_failures(&self) -> u32 {
        self.auth_failures
    }

    pub fn rssi(&self) -> Option<i32> {
        self.radio.rssi()
    }

    pub fn local_address(&self) -> Option<IpAddr> {
        self.radio.local_address()
    }

    pub fn status_topic(&self) -> &str {
        self.settings.status_topic.as_str()
    }

    /// Publish through the managed session
    ///
    /// # Errors
    ///
    /// `TransportUnavailable` if the link or session is down, `Publish` if
    /// the client rejects the message
    pub async fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos, retain: bool) -> Result<()> {
        if self.link != LinkState::Connected {
            return Err(TankBridgeError::TransportUnavailable("network link down"));
        }
        if !self.is_transport_ready() {
            return Err(TankBridgeError::TransportUnavailable("broker session down"));
        }
        self.session.publish(topic, payload, qos, retain).await
    }

    /// Take the radio away from the manager for a diagnostic run
    pub async fn lease_radio(&mut self) -> Result<RadioLease<'_, R>> {
        RadioLease::acquire(&mut self.radio).await
    }

    /// Forget link and session state after someone else drove the radio
    ///
    /// Drops whatever association the radio holds and reconnects to the
    /// configured network after the link backoff.
    pub async fn reset_link(&mut self, now: Instant) {
        self.forget_link().await;
        if let Err(e) = self.radio.disconnect().await {
            warn!("Failed to drop the diagnostic association: {}", e);
        }
        self.link = LinkState::Backoff {
            until: now + LINK_BACKOFF,
        };
        info!("Link reset, reconnecting to '{}' in {:?}", self.settings.ssid, LINK_BACKOFF);
    }

    /// Stop link attempts and leave the radio in its current role
    ///
    /// Used while the setup access point must stay up. Cleared by
    /// [`ConnectionManager::reset_link`] or [`ConnectionManager::resume_link`].
    pub async fn park_link(&mut self) {
        self.forget_link().await;
        self.link = LinkState::Parked;
        info!("Link parked, no attempts to '{}' until resumed", self.settings.ssid);
    }

    /// Leave the parked state and reconnect after the link backoff
    pub fn resume_link(&mut self, now: Instant) {
        if self.link == LinkState::Parked {
            self.link = LinkState::Backoff {
                until: now + LINK_BACKOFF,
            };
            info!("Link resumed, reconnecting to '{}' in {:?}", self.settings.ssid, LINK_BACKOFF);
        }
    }

    pub fn is_parked(&self) -> bool {
        self.link == LinkState::Parked
    }

    async fn forget_link(&mut self) {
        let mut stale = 0;
        while self.events.try_recv().is_ok() {
            stale += 1;
        }
        debug!("Discarded {} queued link events", stale);

        self.session.disconnect().await;
        self.session_state = SessionState::Disconnected;
        self.auth_failures = 0;
    }

    /// Announce `offline` and close the session
    pub async fn shutdown(&mut self) {
        if self.is_transport_ready() {
            let topic = self.settings.status_topic.clone();
            if let Err(e) = self
                .session
                .publish(&topic, PAYLOAD_OFFLINE.as_bytes(), Qos::AtLeastOnce, true)
                .await
            {
                error!("Failed to publish offline status: {}", e);
            }
        }
        self.session.disconnect().await;
        self.session_state = SessionState::Disconnected;
        info!("Broker session closed");
    }

    fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::AddressAcquired(addr) => match self.link {
                LinkState::Connecting { .. } => {
                    self.auth_failures = 0;
                    info!("Wi-Fi connected to '{}', address {}", self.settings.ssid, addr);
                    self.link = LinkState::Connected;
                }
                LinkState::Connected => debug!("Address {} confirmed", addr),
                _ => debug!("Ignoring address {} while link is {:?}", addr, self.link),
            },
            LinkEvent::Disconnected(reason) => match self.link {
                LinkState::Connecting { .. } | LinkState::Connected => {
                    if reason.is_auth_failure() {
                        self.auth_failures += 1;
                        warn!(
                            "Wi-Fi authentication failed ({} consecutive)",
                            self.auth_failures
                        );
                    } else {
                        self.auth_failures = 0;
                    }

                    warn!("Wi-Fi link down ({:?}), retrying in {:?}", reason, LINK_BACKOFF);
                    self.link = LinkState::Backoff {
                        until: now + LINK_BACKOFF,
                    };
                    self.session_state = SessionState::Disconnected;
                }
                LinkState::Idle | LinkState::Backoff { .. } | LinkState::Parked => {
                    debug!("Ignoring {:?} while link is {:?}", reason, self.link);
                }
            },
        }
    }

    async fn tick_link(&mut self, now: Instant) {
        match self.link {
            LinkState::Connected | LinkState::Parked => {}
            LinkState::Connecting { deadline } if now >= deadline => {
                warn!(
                    "Wi-Fi attempt to '{}' timed out after {:?}",
                    self.settings.ssid, LINK_ATTEMPT_TIMEOUT
                );
                if let Err(e) = self.radio.disconnect().await {
                    warn!("Failed to abandon link attempt: {}", e);
                }
                self.auth_failures = 0;
                self.link = LinkState::Backoff {
                    until: now + LINK_BACKOFF,
                };
            }
            LinkState::Connecting { .. } => {}
            LinkState::Backoff { until } if now < until => {}
            LinkState::Idle | LinkState::Backoff { .. } => self.begin_link_attempt(now).await,
        }
    }

    async fn begin_link_attempt(&mut self, now: Instant) {
        if self.settings.ssid.is_empty() {
            if !self.warned_unconfigured {
                warn!("No Wi-Fi SSID configured, link stays idle");
                self.warned_unconfigured = true;
            }
            self.link = LinkState::Idle;
            return;
        }

        info!("Connecting to Wi-Fi '{}'", self.settings.ssid);
        match self
            .radio
            .begin_connect(&self.settings.ssid, &self.settings.password)
            .await
        {
            Ok(()) => {
                self.link = LinkState::Connecting {
                    deadline: now + LINK_ATTEMPT_TIMEOUT,
                };
            }
            Err(e) => {
                warn!("Failed to start Wi-Fi attempt: {}", e);
                self.link = LinkState::Backoff {
                    until: now + LINK_BACKOFF,
                };
            }
        }
    }

    async fn tick_session(&mut self, now: Instant) -> Option<ConnectionEvent> {
        if self.session_state == SessionState::Connected && !self.session.is_connected() {
            warn!("Broker session lost");
            self.session_state = SessionState::Disconnected;
        }

        if self.link != LinkState::Connected || self.settings.session.host.is_empty() {
            return None;
        }

        match self.session_state {
            SessionState::Connected => None,
            SessionState::Backoff { until } if now < until => None,
            _ => self.connect_session(now).await,
        }
    }

    async fn connect_session(&mut self, now: Instant) -> Option<ConnectionEvent> {
        self.session_state = SessionState::Connecting;
        let options = &self.settings.session;
        info!(
            "Connecting to broker {}:{} as '{}'",
            options.host, options.port, options.client_id
        );

        match self.session.connect(options).await {
            Ok(()) => {
                let topic = self.settings.status_topic.clone();
                if let Err(e) = self
                    .session
                    .publish(&topic, PAYLOAD_ONLINE.as_bytes(), Qos::AtLeastOnce, true)
                    .await
                {
                    error!("Failed to publish online status: {}", e);
                }
                self.session_state = SessionState::Connected;
                info!("Broker session established");
                Some(ConnectionEvent::SessionEstablished)
            }
            Err(failure) => {
                warn!(
                    "Broker connect failed (code {}): {}, retrying in {:?}",
                    failure.code(),
                    failure,
                    SESSION_BACKOFF
                );
                self.session_state = SessionState::Backoff {
                    until: now + SESSION_BACKOFF,
                };
                None
            }
        }
    }
}
