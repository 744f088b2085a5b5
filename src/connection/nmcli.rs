//! # NetworkManager Radio
//!
//! [`Radio`] implementation that drives NetworkManager through `nmcli`.
//!
//! Connect attempts run as a spawned task so the control loop keeps running;
//! the task reports its outcome as a [`LinkEvent`]. Link loss outside an
//! attempt is detected by polling the device state.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::radio::{DisconnectReason, LinkEvent, LinkStatus, Radio, RadioMode};
use crate::config::WifiConfig;
use crate::error::{Result, TankBridgeError};

/// Seconds nmcli waits for an activation to finish
const ACTIVATION_WAIT_S: &str = "15";

/// Minimum time between device state queries in `poll`
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Connection profile name used for the setup access point
const HOTSPOT_PROFILE: &str = "Hotspot";

const PROC_WIRELESS: &str = "/proc/net/wireless";

/// NetworkManager device states we care about
const NM_DEVICE_DISCONNECTED: u32 = 30;
const NM_DEVICE_ACTIVATED: u32 = 100;
const NM_DEVICE_FAILED: u32 = 120;

#[derive(Default)]
struct Shared {
    address: Option<IpAddr>,
    last_failure: Option<DisconnectReason>,
}

/// Wi-Fi interface managed by NetworkManager
pub struct NmcliRadio {
    interface: String,
    ap_ssid: String,
    ap_password: String,
    events: UnboundedSender<LinkEvent>,
    shared: Arc<Mutex<Shared>>,
    attempt: Option<JoinHandle<()>>,
    last_poll: Option<Instant>,
}

impl NmcliRadio {
    pub fn new(config: &WifiConfig, events: UnboundedSender<LinkEvent>) -> Self {
        Self {
            interface: config.interface.clone(),
            ap_ssid: config.ap_ssid.clone(),
            ap_password: config.ap_password.clone(),
            events,
            shared: Arc::new(Mutex::new(Shared::default())),
            attempt: None,
            last_poll: None,
        }
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        // A poisoned lock only means a spawned attempt panicked mid-update
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn abort_attempt(&mut self) {
        if let Some(handle) = self.attempt.take() {
            handle.abort();
        }
    }

    async fn device_state(&self) -> Option<u32> {
        let out = nmcli(&["-g", "GENERAL.STATE", "device", "show", &self.interface])
            .await
            .ok()?;
        parse_device_state(&out)
    }
}

/// Run `nmcli` and return its stdout
async fn nmcli(args: &[&str]) -> Result<String> {
    let output = Command::new("nmcli")
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| TankBridgeError::Radio(format!("failed to run nmcli: {}", e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(TankBridgeError::Radio(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

async fn query_address(interface: &str) -> Option<IpAddr> {
    let out = nmcli(&["-g", "IP4.ADDRESS", "device", "show", interface])
        .await
        .ok()?;
    parse_address(&out)
}

/// Parse `GENERAL.STATE` output such as `100 (connected)`
pub fn parse_device_state(output: &str) -> Option<u32> {
    output.split_whitespace().next()?.parse().ok()
}

/// First address from `IP4.ADDRESS` output such as `192.168.1.40/24`
pub fn parse_address(output: &str) -> Option<IpAddr> {
    output
        .split(['|', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())?
        .split('/')
        .next()?
        .parse()
        .ok()
}

/// Map an nmcli activation error to a disconnect reason
pub fn classify_failure(stderr: &str) -> DisconnectReason {
    let msg = stderr.to_ascii_lowercase();
    if msg.contains("secrets were required")
        || msg.contains("password")
        || msg.contains("802-1x")
        || msg.contains("authentication")
    {
        DisconnectReason::AuthFailed
    } else if msg.contains("no network with ssid") {
        DisconnectReason::NoNetwork
    } else {
        DisconnectReason::Other
    }
}

/// Signal level in dBm for `interface` from `/proc/net/wireless`
pub fn parse_proc_wireless(content: &str, interface: &str) -> Option<i32> {
    content.lines().skip(2).find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }
        // status, link quality, level, noise ...
        let level = rest.split_whitespace().nth(2)?;
        let dbm: f64 = level.trim_end_matches('.').parse().ok()?;
        Some(dbm as i32)
    })
}

fn status_for(state: Option<u32>, shared: &Shared) -> LinkStatus {
    let failed = match shared.last_failure {
        Some(DisconnectReason::NoNetwork) => LinkStatus::NoSsidAvailable,
        Some(DisconnectReason::AuthFailed) => LinkStatus::ConnectFailed,
        Some(DisconnectReason::ConnectionLost) => LinkStatus::ConnectionLost,
        _ => LinkStatus::Disconnected,
    };
    match state {
        Some(NM_DEVICE_ACTIVATED) => match shared.address {
            Some(addr) => LinkStatus::Connected(addr),
            None => LinkStatus::Idle,
        },
        Some(NM_DEVICE_FAILED) => match failed {
            LinkStatus::Disconnected => LinkStatus::ConnectFailed,
            other => other,
        },
        Some(NM_DEVICE_DISCONNECTED) => failed,
        Some(s) if s > NM_DEVICE_DISCONNECTED && s < NM_DEVICE_ACTIVATED => LinkStatus::Idle,
        _ => LinkStatus::Disconnected,
    }
}

#[async_trait]
impl Radio for NmcliRadio {
    async fn set_mode(&mut self, mode: RadioMode) -> Result<()> {
        match mode {
            RadioMode::AccessPoint => {
                info!("Starting setup access point '{}'", self.ap_ssid);
                self.abort_attempt();
                nmcli(&[
                    "device", "wifi", "hotspot",
                    "ifname", &self.interface,
                    "con-name", HOTSPOT_PROFILE,
                    "ssid", &self.ap_ssid,
                    "password", &self.ap_password,
                ])
                .await?;
                self.shared().address = None;
            }
            RadioMode::Station => {
                if let Err(e) = nmcli(&["connection", "down", HOTSPOT_PROFILE]).await {
                    debug!("Hotspot not active: {}", e);
                }
            }
            RadioMode::StationAndAccessPoint => {
                // One NetworkManager interface cannot hold both roles; station
                // attempts take the interface and the hotspot returns on release
                debug!("Station+AP requested on {}", self.interface);
            }
        }
        Ok(())
    }

    async fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<()> {
        self.abort_attempt();
        {
            let mut shared = self.shared();
            shared.last_failure = None;
            shared.address = None;
        }

        let interface = self.interface.clone();
        let ssid = ssid.to_string();
        let password = password.to_string();
        let events = self.events.clone();
        let shared = Arc::clone(&self.shared);

        self.attempt = Some(tokio::spawn(async move {
            let mut args = vec![
                "--wait", ACTIVATION_WAIT_S,
                "device", "wifi", "connect", ssid.as_str(),
            ];
            if !password.is_empty() {
                args.extend(["password", password.as_str()]);
            }
            args.extend(["ifname", interface.as_str()]);

            let event = match nmcli(&args).await {
                Ok(_) => match query_address(&interface).await {
                    Some(addr) => LinkEvent::AddressAcquired(addr),
                    None => {
                        warn!("Joined '{}' but no IPv4 address assigned", ssid);
                        LinkEvent::Disconnected(DisconnectReason::Other)
                    }
                },
                Err(e) => {
                    let reason = match &e {
                        TankBridgeError::Radio(stderr) => classify_failure(stderr),
                        _ => DisconnectReason::Other,
                    };
                    debug!("nmcli connect to '{}' failed: {}", ssid, e);
                    LinkEvent::Disconnected(reason)
                }
            };

            {
                let mut shared = shared.lock().unwrap_or_else(|e| e.into_inner());
                match event {
                    LinkEvent::AddressAcquired(addr) => shared.address = Some(addr),
                    LinkEvent::Disconnected(reason) => shared.last_failure = Some(reason),
                }
            }
            // Receiver gone means the bridge is shutting down
            let _ = events.send(event);
        }));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.abort_attempt();
        if let Err(e) = nmcli(&["device", "disconnect", &self.interface]).await {
            debug!("nmcli disconnect: {}", e);
        }
        let mut shared = self.shared();
        shared.address = None;
        shared.last_failure = None;
        Ok(())
    }

    async fn status(&mut self) -> LinkStatus {
        let state = self.device_state().await;
        if state == Some(NM_DEVICE_ACTIVATED) && self.shared().address.is_none() {
            let addr = query_address(&self.interface).await;
            self.shared().address = addr;
        }
        status_for(state, &self.shared())
    }

    async fn poll(&mut self) {
        let now = Instant::now();
        if self.last_poll.is_some_and(|t| now.duration_since(t) < POLL_INTERVAL) {
            return;
        }
        self.last_poll = Some(now);

        // Attempt in flight reports its own outcome
        if self.attempt.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        if self.shared().address.is_none() {
            return;
        }

        let state = self.device_state().await;
        if state != Some(NM_DEVICE_ACTIVATED) {
            info!("{} left the network (state {:?})", self.interface, state);
            {
                let mut shared = self.shared();
                shared.address = None;
                shared.last_failure = Some(DisconnectReason::ConnectionLost);
            }
            let _ = self
                .events
                .send(LinkEvent::Disconnected(DisconnectReason::ConnectionLost));
        }
    }

    fn rssi(&self) -> Option<i32> {
        let content = std::fs::read_to_string(PROC_WIRELESS).ok()?;
        parse_proc_wireless(&content, &self.interface)
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.shared().address
    }
}

impl Drop for NmcliRadio {
    fn drop(&mut self) {
        self.abort_attempt();
    }
}
