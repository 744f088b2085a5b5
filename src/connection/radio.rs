//! Radio seam: station link control, link notifications and role leasing

use async_trait::async_trait;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Role of the wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Joined to the configured network
    Station,
    /// Broadcasting the setup access point only
    AccessPoint,
    /// Station plus setup access point, used while diagnostics run
    StationAndAccessPoint,
}

/// Station status as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    NoSsidAvailable,
    Connected(IpAddr),
    ConnectFailed,
    ConnectionLost,
    Disconnected,
}

impl LinkStatus {
    /// Raw numeric station status, as shown in diagnostics logs
    ///
    /// | Code | Status |
    /// |------|--------|
    /// | 0 | idle |
    /// | 1 | no SSID available |
    /// | 3 | connected |
    /// | 4 | connect failed |
    /// | 5 | connection lost |
    /// | 6 | disconnected |
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            LinkStatus::Idle => 0,
            LinkStatus::NoSsidAvailable => 1,
            LinkStatus::Connected(_) => 3,
            LinkStatus::ConnectFailed => 4,
            LinkStatus::ConnectionLost => 5,
            LinkStatus::Disconnected => 6,
        }
    }
}

/// Why the station link went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Wrong passphrase or rejected handshake
    AuthFailed,
    /// Configured network not in range
    NoNetwork,
    /// Established link dropped
    ConnectionLost,
    Other,
}

impl DisconnectReason {
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, DisconnectReason::AuthFailed)
    }
}

/// Notification from the network stack, queued for the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    AddressAcquired(IpAddr),
    Disconnected(DisconnectReason),
}

/// Wireless interface driver
///
/// Implementations report link changes as [`LinkEvent`]s through the sender
/// handed to them at construction; they never call back into the manager.
#[async_trait]
pub trait Radio: Send {
    /// Switch the interface role
    async fn set_mode(&mut self, mode: RadioMode) -> Result<()>;

    /// Start joining `ssid`; the outcome arrives as a [`LinkEvent`]
    async fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<()>;

    /// Leave the current network and forget the association
    async fn disconnect(&mut self) -> Result<()>;

    /// Current station status
    async fn status(&mut self) -> LinkStatus;

    /// Service the driver; may queue link events
    async fn poll(&mut self);

    /// Received signal strength in dBm
    fn rssi(&self) -> Option<i32>;

    /// Address on the station network
    fn local_address(&self) -> Option<IpAddr>;
}

/// Exclusive use of the radio outside the connection manager
///
/// Acquiring switches the radio to [`RadioMode::StationAndAccessPoint`] so
/// the setup access point stays reachable; [`RadioLease::release`] switches
/// it to the mode the holder chooses. The lease mutably borrows the manager's
/// radio, so the manager cannot run while a lease is alive.
pub struct RadioLease<'a, R: Radio> {
    radio: &'a mut R,
    released: bool,
}

impl<'a, R: Radio> RadioLease<'a, R> {
    pub(crate) async fn acquire(radio: &'a mut R) -> Result<RadioLease<'a, R>> {
        radio.set_mode(RadioMode::StationAndAccessPoint).await?;
        debug!("Radio leased in station+AP mode");
        Ok(Self {
            radio,
            released: false,
        })
    }

    /// Leased radio
    pub fn radio(&mut self) -> &mut R {
        self.radio
    }

    /// Give the radio back, leaving it in `mode`
    pub async fn release(mut self, mode: RadioMode) -> Result<()> {
        self.released = true;
        info!("Radio lease released, switching to {:?}", mode);
        self.radio.set_mode(mode).await
    }
}

impl<R: Radio> Drop for RadioLease<'_, R> {
    fn drop(&mut self) {
        if !self.released {
            warn!("Radio lease dropped without release, radio left in station+AP mode");
        }
    }
}
