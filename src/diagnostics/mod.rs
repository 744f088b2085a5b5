//! # Connectivity Diagnostics
//!
//! On-demand link and broker tests for the setup portal. Each test makes up
//! to three attempts and stops at the first success. Broker attempts use
//! their own short-lived sessions, never the managed one.
//!
//! Tests hold a [`RadioLease`], so the connection manager is stopped for the
//! whole run (up to about 24 s for a link plus broker test).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::connection::radio::{LinkStatus, Radio, RadioLease};
use crate::connection::session::{BrokerConnector, BrokerSession, SessionOptions};

/// Attempts per test
pub const MAX_ATTEMPTS: u32 = 3;

/// How long one link attempt may take to produce an address
pub const LINK_POLL_TIMEOUT: Duration = Duration::from_secs(4);

/// Status polling period during a link attempt
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a failed attempt
pub const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Parameters of one diagnostic run, as submitted by the setup portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequest {
    pub ssid: String,
    #[serde(default)]
    pub wifi_password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub mqtt_password: String,
    #[serde(default)]
    pub client_id: String,
}

fn default_port() -> u16 {
    1883
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    LinkUp { address: IpAddr },
    /// Raw station status when the attempt gave up
    LinkFailed { status: i32 },
    SessionUp,
    /// Raw connect failure code
    SessionFailed { code: i32 },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::LinkUp { .. } | AttemptOutcome::SessionUp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt {}: ", self.attempt)?;
        match &self.outcome {
            AttemptOutcome::LinkUp { address } => write!(f, "link up, address {}", address),
            AttemptOutcome::LinkFailed { status } => write!(f, "link failed, status {}", status),
            AttemptOutcome::SessionUp => write!(f, "broker connected"),
            AttemptOutcome::SessionFailed { code } => write!(f, "broker failed, code {}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkTestResult {
    pub ok: bool,
    pub address: Option<IpAddr>,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTestResult {
    pub ok: bool,
    pub attempts: Vec<AttemptRecord>,
}

/// Full diagnostic run; the broker test only runs after a successful link test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub link: LinkTestResult,
    pub session: Option<SessionTestResult>,
    pub finished_at: DateTime<Utc>,
}

impl TestReport {
    pub fn ok(&self) -> bool {
        self.link.ok && self.session.as_ref().is_some_and(|s| s.ok)
    }
}

/// Runs link and broker tests
pub struct ConnectivityTester<C> {
    connector: C,
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl<C: BrokerConnector> ConnectivityTester<C> {
    pub fn new(connector: C, keep_alive: Duration, connect_timeout: Duration) -> Self {
        Self {
            connector,
            keep_alive,
            connect_timeout,
        }
    }

    /// Try to join `ssid` on the leased radio
    pub async fn test_link<R: Radio>(
        &self,
        lease: &mut RadioLease<'_, R>,
        ssid: &str,
        password: &str,
    ) -> LinkTestResult {
        let mut attempts = Vec::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let radio = lease.radio();
            if let Err(e) = radio.disconnect().await {
                debug!("Disconnect before link test failed: {}", e);
            }

            let outcome = match radio.begin_connect(ssid, password).await {
                Ok(()) => await_address(radio).await,
                Err(e) => {
                    warn!("Link test could not start: {}", e);
                    AttemptOutcome::LinkFailed {
                        status: radio.status().await.code(),
                    }
                }
            };

            let record = AttemptRecord { attempt, outcome };
            info!("Link test {}", record);
            let address = match record.outcome {
                AttemptOutcome::LinkUp { address } => Some(address),
                _ => None,
            };
            attempts.push(record);

            if address.is_some() {
                return LinkTestResult {
                    ok: true,
                    address,
                    attempts,
                };
            }
            if attempt < MAX_ATTEMPTS {
                sleep(RETRY_PAUSE).await;
            }
        }

        LinkTestResult {
            ok: false,
            address: None,
            attempts,
        }
    }

    /// Try to open a broker session with the given parameters
    ///
    /// Every attempt uses a fresh session with client id
    /// `<client_id>-test-<attempt>` and closes it before returning.
    pub async fn test_session(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        client_id: &str,
    ) -> SessionTestResult {
        let mut attempts = Vec::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let options = SessionOptions {
                host: host.to_string(),
                port,
                client_id: format!("{}-test-{}", client_id, attempt),
                credentials: SessionOptions::credentials_from(username, password),
                last_will: None,
                keep_alive: self.keep_alive,
                connect_timeout: self.connect_timeout,
            };

            let mut session = self.connector.open();
            let outcome = match session.connect(&options).await {
                Ok(()) => AttemptOutcome::SessionUp,
                Err(failure) => {
                    debug!("Test session failed: {}", failure);
                    AttemptOutcome::SessionFailed {
                        code: failure.code(),
                    }
                }
            };
            session.disconnect().await;

            let record = AttemptRecord { attempt, outcome };
            info!("Broker test {}", record);
            let ok = record.outcome.is_success();
            attempts.push(record);

            if ok {
                return SessionTestResult { ok, attempts };
            }
            if attempt < MAX_ATTEMPTS {
                sleep(RETRY_PAUSE).await;
            }
        }

        SessionTestResult {
            ok: false,
            attempts,
        }
    }
}

async fn await_address<R: Radio>(radio: &mut R) -> AttemptOutcome {
    let deadline = Instant::now() + LINK_POLL_TIMEOUT;
    loop {
        let status = radio.status().await;
        if let LinkStatus::Connected(address) = status {
            return AttemptOutcome::LinkUp { address };
        }
        if Instant::now() >= deadline {
            return AttemptOutcome::LinkFailed {
                status: status.code(),
            };
        }
        sleep(POLL_INTERVAL).await;
    }
}
