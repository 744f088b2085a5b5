//! # Telemetry Module
//!
//! Publishes one tank reading per interval to the data topic.
//!
//! Telemetry is best-effort: a cycle that finds the transport down is
//! skipped and logged, never queued. A failed sample still publishes, using
//! the error-shaped payload.
//!
//! ## Payloads
//!
//! ```json
//! {"distance_mm":500,"level_mm":975,"percent":65.0,"liters":765.76,"rssi":-61}
//! {"error":"no_read","rssi":-61}
//! ```

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::connection::radio::Radio;
use crate::connection::session::{BrokerSession, Qos};
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::sensor::ranger::RangeFinder;
use crate::sensor::SensorSampler;
use crate::tank::TankGeometry;

/// Error code sent when the sensor produced no distance
pub const NO_READ: &str = "no_read";

/// Message body for the data topic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryMessage {
    Reading {
        distance_mm: i32,
        level_mm: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        liters: Option<f64>,
        rssi: i32,
    },
    NoRead {
        error: &'static str,
        rssi: i32,
    },
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

impl TelemetryMessage {
    /// Build the message for one sample; `None` yields the error payload
    pub fn from_sample(distance_mm: Option<i32>, geometry: &TankGeometry, rssi: i32) -> Self {
        match distance_mm {
            Some(distance) => {
                let reading = geometry.reading(distance);
                TelemetryMessage::Reading {
                    distance_mm: reading.distance_mm,
                    level_mm: reading.level_mm,
                    percent: reading.percent.map(|p| round_to(p, 1)),
                    liters: reading.liters.map(|l| round_to(l, 2)),
                    rssi,
                }
            }
            None => TelemetryMessage::NoRead {
                error: NO_READ,
                rssi,
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// What one `publish_if_due` call did
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryOutcome {
    NotDue,
    /// Due, but the transport was down
    Skipped,
    Published(TelemetryMessage),
    /// Due and sampled, but the client rejected the message
    Failed,
}

/// Interval timer plus the publish step
pub struct TelemetryPublisher {
    interval: Duration,
    last_publish: Instant,
}

impl TelemetryPublisher {
    /// First cycle falls one interval after `started`
    pub fn new(interval_minutes: u32, started: Instant) -> Self {
        Self {
            interval: Duration::from_secs(u64::from(interval_minutes) * 60),
            last_publish: started,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_publish) >= self.interval
    }

    /// Sample and publish if an interval has passed since the last cycle
    ///
    /// The cycle counts as done even when it is skipped or fails.
    pub async fn publish_if_due<R, S, F>(
        &mut self,
        now: Instant,
        manager: &mut ConnectionManager<R, S>,
        sampler: &mut SensorSampler<F>,
        geometry: &TankGeometry,
        topic: &str,
    ) -> TelemetryOutcome
    where
        R: Radio,
        S: BrokerSession,
        F: RangeFinder,
    {
        if !self.is_due(now) {
            return TelemetryOutcome::NotDue;
        }
        self.last_publish = now;

        if !manager.is_transport_ready() {
            warn!("Transport not ready, skipping telemetry cycle");
            return TelemetryOutcome::Skipped;
        }

        let distance = sampler.sample().await;
        let message = TelemetryMessage::from_sample(distance, geometry, manager.rssi().unwrap_or(0));
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode telemetry {:?}: {}", message, e);
                return TelemetryOutcome::Failed;
            }
        };
        debug!("Telemetry payload {}", payload);

        match manager
            .publish(topic, payload.as_bytes(), Qos::AtMostOnce, false)
            .await
        {
            Ok(()) => {
                match distance {
                    Some(_) => info!("Published telemetry to {}", topic),
                    None => warn!("Sensor read failed, published no_read to {}", topic),
                }
                TelemetryOutcome::Published(message)
            }
            Err(e) => {
                error!("Telemetry publish failed: {} (payload {})", e, payload);
                TelemetryOutcome::Failed
            }
        }
    }
}
