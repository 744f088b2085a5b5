//! # Bridge Runtime
//!
//! The context the control loop owns: connection manager, sampler,
//! publishers and tester, plus the identity and geometry they work from.
//!
//! One [`Runtime::step`] runs, in order:
//!
//! 1. pump the radio and broker session
//! 2. tick both connection state machines
//! 3. publish discovery if the session was just established
//! 4. publish telemetry if an interval has passed
//!
//! The diagnostic entry points (`run_test`, `publish_discovery_now`,
//! `current_reading`) are what the setup portal calls; the binary feeds them
//! from stdin through [`DiagnosticCommand`].

use chrono::Utc;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{Config, DeviceIdentity};
use crate::connection::radio::{Radio, RadioMode};
use crate::connection::session::{BrokerConnector, BrokerSession};
use crate::connection::{ConnectionEvent, ConnectionManager};
use crate::diagnostics::{ConnectivityTester, TestReport, TestRequest};
use crate::discovery::DiscoveryPublisher;
use crate::error::{Result, TankBridgeError};
use crate::sensor::ranger::RangeFinder;
use crate::sensor::SensorSampler;
use crate::tank::{Reading, TankGeometry};
use crate::telemetry::{TelemetryOutcome, TelemetryPublisher};

/// Period of the control loop
pub const STEP_INTERVAL: Duration = Duration::from_millis(100);

/// Everything the control loop drives
pub struct Runtime<R, S, F, C> {
    identity: DeviceIdentity,
    geometry: TankGeometry,
    manager: ConnectionManager<R, S>,
    sampler: SensorSampler<F>,
    telemetry: TelemetryPublisher,
    discovery: DiscoveryPublisher,
    tester: ConnectivityTester<C>,
}

impl<R, S, F, C> Runtime<R, S, F, C>
where
    R: Radio,
    S: BrokerSession,
    F: RangeFinder,
    C: BrokerConnector,
{
    pub fn new(
        config: &Config,
        manager: ConnectionManager<R, S>,
        sampler: SensorSampler<F>,
        connector: C,
        started: Instant,
    ) -> Self {
        let runtime = Self {
            identity: config.identity(),
            geometry: config.geometry(),
            manager,
            sampler,
            telemetry: TelemetryPublisher::new(config.telemetry.interval_minutes, started),
            discovery: DiscoveryPublisher::new(config.discovery.enabled),
            tester: ConnectivityTester::new(
                connector,
                Duration::from_secs(u64::from(config.mqtt.keep_alive_s)),
                Duration::from_millis(config.mqtt.connect_timeout_ms),
            ),
        };
        info!(
            "Publishing to {} every {:?}, discovery {}",
            runtime.identity.data_topic,
            runtime.telemetry.interval(),
            if runtime.discovery.is_enabled() { "enabled" } else { "disabled" }
        );
        runtime
    }

    pub fn manager(&self) -> &ConnectionManager<R, S> {
        &self.manager
    }

    /// One control loop iteration
    pub async fn step(&mut self, now: Instant) -> TelemetryOutcome {
        self.manager.pump(now).await;

        if let Some(ConnectionEvent::SessionEstablished) = self.manager.tick(now).await {
            self.discovery
                .publish_all(&mut self.manager, &self.identity)
                .await;
        }

        self.telemetry
            .publish_if_due(
                now,
                &mut self.manager,
                &mut self.sampler,
                &self.geometry,
                &self.identity.data_topic,
            )
            .await
    }

    /// Run a link test and, if it passes, a broker test
    ///
    /// The radio is leased for the whole run. If the link test passed the
    /// radio goes back to station mode and the manager reconnects to the
    /// configured network. Otherwise it stays in access-point mode so the
    /// setup portal remains reachable, and the manager's link is parked
    /// until [`Runtime::resume_link`] or a later passing test.
    pub async fn run_test(&mut self, request: &TestRequest) -> Result<TestReport> {
        info!("Connectivity test for '{}' started", request.ssid);
        let client_id = if request.client_id.is_empty() {
            self.identity.client_id.as_str()
        } else {
            request.client_id.as_str()
        };

        let mut lease = self.manager.lease_radio().await?;
        let link = self
            .tester
            .test_link(&mut lease, &request.ssid, &request.wifi_password)
            .await;

        let session = if link.ok {
            Some(
                self.tester
                    .test_session(
                        &request.host,
                        request.port,
                        &request.username,
                        &request.mqtt_password,
                        client_id,
                    )
                    .await,
            )
        } else {
            warn!("Link test failed, skipping broker test");
            None
        };

        // Nothing from the run may complete after the role switch
        if let Err(e) = lease.radio().disconnect().await {
            warn!("Failed to drop the test association: {}", e);
        }

        let released = if link.ok {
            let released = lease.release(RadioMode::Station).await;
            self.manager.reset_link(Instant::now()).await;
            released
        } else {
            let released = lease.release(RadioMode::AccessPoint).await;
            self.manager.park_link().await;
            released
        };
        released?;

        let report = TestReport {
            link,
            session,
            finished_at: Utc::now(),
        };
        info!("Connectivity test finished, ok = {}", report.ok());
        Ok(report)
    }

    /// Republish discovery descriptors on request
    pub async fn publish_discovery_now(&mut self) -> usize {
        self.discovery
            .publish_all(&mut self.manager, &self.identity)
            .await
    }

    /// Leave the access-point hold after a failed test
    ///
    /// Takes the setup access point down and lets the manager reconnect.
    /// Returns `false` if the link was not parked.
    pub async fn resume_link(&mut self) -> Result<bool> {
        if !self.manager.is_parked() {
            return Ok(false);
        }
        let lease = self.manager.lease_radio().await?;
        let released = lease.release(RadioMode::Station).await;
        self.manager.resume_link(Instant::now());
        released?;
        Ok(true)
    }

    /// Take a fresh sample outside the telemetry schedule
    pub async fn current_reading(&mut self) -> Option<Reading> {
        let distance = self.sampler.sample().await?;
        Some(self.geometry.reading(distance))
    }

    /// Execute one diagnostic command and render the JSON response
    pub async fn handle_command(&mut self, command: DiagnosticCommand) -> Result<String> {
        let response = match command {
            DiagnosticCommand::Reading => match self.current_reading().await {
                Some(reading) => serde_json::to_value(reading)?,
                None => json!({ "error": crate::telemetry::NO_READ }),
            },
            DiagnosticCommand::Discovery => {
                json!({ "published": self.publish_discovery_now().await })
            }
            DiagnosticCommand::Test(request) => serde_json::to_value(self.run_test(&request).await?)?,
            DiagnosticCommand::Reconnect => json!({ "resumed": self.resume_link().await? }),
        };
        Ok(response.to_string())
    }

    /// Publish `offline` and close the session
    pub async fn shutdown(&mut self) {
        self.manager.shutdown().await;
    }
}

/// Diagnostic request read from the command channel
///
/// | Line | Command |
/// |------|---------|
/// | `reading` | sample now |
/// | `discovery` | republish discovery |
/// | `test {json}` | connectivity test, body is a [`TestRequest`] |
/// | `reconnect` | leave the access-point hold after a failed test |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticCommand {
    Reading,
    Discovery,
    Test(TestRequest),
    Reconnect,
}

impl FromStr for DiagnosticCommand {
    type Err = TankBridgeError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));

        match word {
            "reading" => Ok(DiagnosticCommand::Reading),
            "discovery" => Ok(DiagnosticCommand::Discovery),
            "reconnect" => Ok(DiagnosticCommand::Reconnect),
            "test" => Ok(DiagnosticCommand::Test(serde_json::from_str(rest.trim())?)),
            other => Err(TankBridgeError::InvalidCommand(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mocks::{test_config, MockConnector, MockRadio, MockSession};
    use crate::connection::radio::{DisconnectReason, LinkEvent};
    use crate::connection::session::ConnectFailure;
    use crate::connection::{ConnectionSettings, LinkState};
    use crate::diagnostics::AttemptOutcome;
    use crate::sensor::ranger::MockRangeFinder;
    use crate::tank::TankShape;
    use tokio_test::{assert_err, assert_ok};

    type TestRuntime = Runtime<MockRadio, MockSession, MockRangeFinder, MockConnector>;

    struct Harness {
        runtime: TestRuntime,
        radio: MockRadio,
        session: MockSession,
        connector: MockConnector,
        t0: Instant,
    }

    fn harness(distance: Option<u32>) -> Harness {
        let mut config = test_config();
        config.tank.shape = TankShape::Cylinder;
        config.tank.cylinder_diameter_mm = 1000;
        config.tank.depth_mm = 1500;
        config.tank.sensor_offset_mm = 25;

        let (radio, events) = MockRadio::new();
        let session = MockSession::new();
        let connector = MockConnector::default();
        let manager = ConnectionManager::new(
            radio.clone(),
            session.clone(),
            events,
            ConnectionSettings::from_config(&config),
        );

        let mut ranger = MockRangeFinder::new();
        ranger.expect_measure().returning(move |_| distance);

        let t0 = Instant::now();
        let runtime = Runtime::new(
            &config,
            manager,
            SensorSampler::new(ranger),
            connector.clone(),
            t0,
        );
        Harness {
            runtime,
            radio,
            session,
            connector,
            t0,
        }
    }

    impl Harness {
        /// Bring link and session up through two steps
        async fn connect(&mut self) {
            self.radio
                .script(Some(LinkEvent::AddressAcquired("192.168.1.40".parse().unwrap())));
            self.runtime.step(self.t0).await;
            self.runtime.step(self.t0 + STEP_INTERVAL).await;
            assert!(self.runtime.manager().is_transport_ready());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_then_discovery_then_telemetry() {
        let mut h = harness(Some(500));
        h.connect().await;

        let outcome = h.runtime.step(h.t0 + Duration::from_secs(60)).await;
        assert!(matches!(outcome, TelemetryOutcome::Published(_)));

        let published = h.session.published();
        assert_eq!(published.len(), 7);
        assert_eq!(published[0].topic, "tank/t1/status");
        assert_eq!(published[0].payload, "online");
        assert!(published[1..6]
            .iter()
            .all(|p| p.topic.starts_with("homeassistant/sensor/t1_") && p.retain));
        assert_eq!(published[6].topic, "tank/t1/data");
        assert_eq!(
            published[6].payload,
            r#"{"distance_mm":500,"level_mm":975,"percent":65.0,"liters":765.76,"rssi":-61}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_publishes_exact_no_read() {
        let mut h = harness(None);
        h.connect().await;
        *h.radio.rssi.lock().unwrap() = Some(-72);

        h.runtime.step(h.t0 + Duration::from_secs(60)).await;

        let last = h.session.published().pop().unwrap();
        assert_eq!(last.payload, r#"{"error":"no_read","rssi":-72}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_skipped_while_offline() {
        let mut h = harness(Some(500));
        h.radio.script(None);

        let outcome = h.runtime.step(h.t0 + Duration::from_secs(60)).await;
        assert_eq!(outcome, TelemetryOutcome::Skipped);
        assert!(h.session.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_after_every_session_establish() {
        let mut h = harness(Some(500));
        h.connect().await;

        h.session.drop_session();
        h.runtime.step(h.t0 + STEP_INTERVAL * 2).await;

        let online = h
            .session
            .published()
            .iter()
            .filter(|p| p.payload == "online")
            .count();
        let discovery = h
            .session
            .published()
            .iter()
            .filter(|p| p.topic.ends_with("/config"))
            .count();
        assert_eq!(online, 2);
        assert_eq!(discovery, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_test_success_restores_station() {
        let mut h = harness(Some(500));
        h.connect().await;
        h.radio
            .script(Some(LinkEvent::AddressAcquired("10.0.0.9".parse().unwrap())));

        let request: TestRequest = serde_json::from_str(
            r#"{"ssid":"othernet","wifi_password":"pw","host":"broker.test","port":1884}"#,
        )
        .unwrap();
        let report = h.runtime.run_test(&request).await.unwrap();

        assert!(report.ok());
        assert_eq!(report.link.attempts.len(), 1);
        assert_eq!(
            report.session.as_ref().unwrap().attempts[0].outcome,
            AttemptOutcome::SessionUp
        );
        assert_eq!(h.radio.mode(), Some(RadioMode::Station));

        let calls = h.connector.session.connect_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].client_id, "t1-test-1");
        assert_eq!(calls[0].port, 1884);

        // Managed session is untouched by the test sessions
        assert_eq!(h.session.connect_count(), 1);
        assert!(matches!(
            h.runtime.manager().link_state(),
            LinkState::Backoff { .. }
        ));
        assert!(!h.runtime.manager().is_transport_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_test_link_failure_returns_to_access_point() {
        let mut h = harness(Some(500));
        for _ in 0..3 {
            h.radio
                .script(Some(LinkEvent::Disconnected(DisconnectReason::AuthFailed)));
        }

        let request = TestRequest {
            ssid: "othernet".to_string(),
            wifi_password: "wrong".to_string(),
            host: "broker.test".to_string(),
            port: 1883,
            username: String::new(),
            mqtt_password: String::new(),
            client_id: String::new(),
        };
        let report = h.runtime.run_test(&request).await.unwrap();

        assert!(!report.link.ok);
        assert_eq!(report.link.attempts.len(), 3);
        assert!(report.session.is_none());
        assert_eq!(h.connector.opened(), 0);
        assert_eq!(h.radio.mode(), Some(RadioMode::AccessPoint));
        assert!(h.runtime.manager().is_parked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_point_held_after_failed_test() {
        let mut h = harness(Some(500));
        h.connect().await;
        for _ in 0..3 {
            h.radio
                .script(Some(LinkEvent::Disconnected(DisconnectReason::AuthFailed)));
        }

        let request: TestRequest =
            serde_json::from_str(r#"{"ssid":"othernet","wifi_password":"wrong"}"#).unwrap();
        let report = h.runtime.run_test(&request).await.unwrap();
        assert!(!report.link.ok);

        let start = Instant::now();
        for i in 1..=600 {
            h.runtime.step(start + STEP_INTERVAL * i).await;
        }

        let tanknet_attempts = h
            .radio
            .connects
            .lock()
            .unwrap()
            .iter()
            .filter(|ssid| ssid.as_str() == "tanknet")
            .count();
        assert_eq!(tanknet_attempts, 1);
        assert_eq!(h.radio.mode(), Some(RadioMode::AccessPoint));
        assert_eq!(h.runtime.manager().link_state(), LinkState::Parked);

        h.radio
            .script(Some(LinkEvent::AddressAcquired("192.168.1.40".parse().unwrap())));
        let response = h
            .runtime
            .handle_command(DiagnosticCommand::Reconnect)
            .await
            .unwrap();
        assert_eq!(response, r#"{"resumed":true}"#);
        assert_eq!(h.radio.mode(), Some(RadioMode::Station));

        let resumed = Instant::now();
        h.runtime.step(resumed + Duration::from_secs(3)).await;
        h.runtime
            .step(resumed + Duration::from_secs(3) + STEP_INTERVAL)
            .await;
        assert!(h.runtime.manager().is_transport_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_test_session_failure_reported() {
        let mut h = harness(Some(500));
        h.radio
            .script(Some(LinkEvent::AddressAcquired("10.0.0.9".parse().unwrap())));
        for _ in 0..3 {
            h.connector.session.script(Err(ConnectFailure::Refused(5)));
        }

        let request: TestRequest =
            serde_json::from_str(r#"{"ssid":"tanknet","host":"broker.local"}"#).unwrap();
        let report = h.runtime.run_test(&request).await.unwrap();

        assert!(report.link.ok);
        let session = report.session.unwrap();
        assert!(!session.ok);
        assert_eq!(session.attempts.len(), 3);
        assert_eq!(h.radio.mode(), Some(RadioMode::Station));
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_reading() {
        let mut h = harness(Some(500));
        let reading = h.runtime.current_reading().await.unwrap();
        assert_eq!(reading.level_mm, 975);
        assert_eq!(reading.percent, Some(65.0));

        let mut h = harness(None);
        assert_eq!(h.runtime.current_reading().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_commands() {
        let mut h = harness(Some(500));
        h.connect().await;

        let response = h
            .runtime
            .handle_command(DiagnosticCommand::Discovery)
            .await
            .unwrap();
        assert_eq!(response, r#"{"published":5}"#);

        let response = h
            .runtime
            .handle_command(DiagnosticCommand::Reading)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["level_mm"], 975);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_marks_offline() {
        let mut h = harness(Some(500));
        h.connect().await;
        h.runtime.shutdown().await;

        let last = h.session.published().pop().unwrap();
        assert_eq!(last.payload, "offline");
        assert!(last.retain);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            assert_ok!("reading".parse::<DiagnosticCommand>()),
            DiagnosticCommand::Reading
        );
        assert_eq!(
            assert_ok!("  discovery\n".parse::<DiagnosticCommand>()),
            DiagnosticCommand::Discovery
        );
        assert_eq!(
            assert_ok!("reconnect".parse::<DiagnosticCommand>()),
            DiagnosticCommand::Reconnect
        );
        assert_err!("".parse::<DiagnosticCommand>());

        match r#"test {"ssid":"tanknet","port":8883}"#.parse::<DiagnosticCommand>() {
            Ok(DiagnosticCommand::Test(request)) => {
                assert_eq!(request.ssid, "tanknet");
                assert_eq!(request.port, 8883);
            }
            other => panic!("Expected test command, got {:?}", other),
        }

        assert!(matches!(
            "reboot".parse::<DiagnosticCommand>(),
            Err(TankBridgeError::InvalidCommand(_))
        ));
        assert!(matches!(
            "test {not json".parse::<DiagnosticCommand>(),
            Err(TankBridgeError::Json(_))
        ));
    }
}
