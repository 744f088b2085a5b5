//! # Home Assistant Discovery
//!
//! Publishes one retained sensor descriptor per tank metric so Home Assistant
//! registers the entities on its own. All entities share the telemetry topic
//! and pick their value out with a template.
//!
//! Descriptors for the same identity and address are byte-identical on every
//! run; consumers deduplicate on the payload.
//!
//! Reference: https://www.home-assistant.io/integrations/mqtt/#mqtt-discovery

use serde::Serialize;
use std::net::IpAddr;
use tracing::{debug, error, info};

use crate::config::DeviceIdentity;
use crate::connection::radio::Radio;
use crate::connection::session::{BrokerSession, Qos, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use crate::connection::ConnectionManager;

/// Reported as the device's software version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Static description of one tracked metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub state_class: Option<&'static str>,
    pub entity_category: Option<&'static str>,
    pub icon: Option<&'static str>,
}

/// Metrics announced to Home Assistant, keyed like the telemetry fields
pub const METRICS: [Metric; 5] = [
    Metric {
        key: "level_mm",
        name: "Water Level",
        unit: Some("mm"),
        device_class: Some("distance"),
        state_class: Some("measurement"),
        entity_category: None,
        icon: Some("mdi:waves-arrow-up"),
    },
    Metric {
        key: "percent",
        name: "Water Level Percent",
        unit: Some("%"),
        device_class: None,
        state_class: Some("measurement"),
        entity_category: None,
        icon: Some("mdi:water-percent"),
    },
    Metric {
        key: "liters",
        name: "Water Volume",
        unit: Some("L"),
        device_class: Some("volume_storage"),
        state_class: Some("measurement"),
        entity_category: None,
        icon: Some("mdi:water"),
    },
    Metric {
        key: "distance_mm",
        name: "Sensor Distance",
        unit: Some("mm"),
        device_class: Some("distance"),
        state_class: Some("measurement"),
        entity_category: Some("diagnostic"),
        icon: Some("mdi:arrow-expand-vertical"),
    },
    Metric {
        key: "rssi",
        name: "WiFi Signal",
        unit: Some("dBm"),
        device_class: Some("signal_strength"),
        state_class: Some("measurement"),
        entity_category: Some("diagnostic"),
        icon: Some("mdi:wifi"),
    },
];

#[derive(Debug, Serialize)]
struct DeviceBlock<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
    manufacturer: &'a str,
    model: &'a str,
    sw_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    configuration_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SensorDescriptor<'a> {
    name: &'static str,
    unique_id: String,
    state_topic: &'a str,
    availability_topic: &'a str,
    payload_available: &'static str,
    payload_not_available: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<&'static str>,
    value_template: String,
    device: &'a DeviceBlock<'a>,
}

/// Discovery config topic for one metric
///
/// Format: `<prefix>/sensor/<client_id>_<key>/config`
pub fn config_topic(identity: &DeviceIdentity, metric: &Metric) -> String {
    format!(
        "{}/sensor/{}_{}/config",
        identity.discovery_prefix, identity.client_id, metric.key
    )
}

/// Build every `(topic, payload)` pair in [`METRICS`] order
pub fn descriptors(identity: &DeviceIdentity, address: Option<IpAddr>) -> Vec<(String, String)> {
    let device = DeviceBlock {
        identifiers: [identity.client_id.as_str()],
        name: &identity.name,
        manufacturer: &identity.manufacturer,
        model: &identity.model,
        sw_version: VERSION,
        configuration_url: address.map(|addr| format!("http://{}/", addr)),
    };

    METRICS
        .iter()
        .filter_map(|metric| {
            let descriptor = SensorDescriptor {
                name: metric.name,
                unique_id: format!("{}_{}", identity.client_id, metric.key),
                state_topic: &identity.data_topic,
                availability_topic: &identity.status_topic,
                payload_available: PAYLOAD_ONLINE,
                payload_not_available: PAYLOAD_OFFLINE,
                unit_of_measurement: metric.unit,
                device_class: metric.device_class,
                state_class: metric.state_class,
                entity_category: metric.entity_category,
                icon: metric.icon,
                value_template: format!("{{{{ value_json.{} }}}}", metric.key),
                device: &device,
            };
            match serde_json::to_string(&descriptor) {
                Ok(payload) => Some((config_topic(identity, metric), payload)),
                Err(e) => {
                    error!("Failed to encode {} descriptor: {}", metric.key, e);
                    None
                }
            }
        })
        .collect()
}

/// Publishes the discovery descriptors over the managed session
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryPublisher {
    enabled: bool,
}

impl DiscoveryPublisher {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Publish all descriptors, retained
    ///
    /// # Returns
    ///
    /// Number of descriptors the client accepted; 0 when disabled or the
    /// session is down
    pub async fn publish_all<R: Radio, S: BrokerSession>(
        &self,
        manager: &mut ConnectionManager<R, S>,
        identity: &DeviceIdentity,
    ) -> usize {
        if !self.enabled {
            debug!("Discovery disabled, nothing published");
            return 0;
        }
        if !manager.is_transport_ready() {
            info!("Broker session down, discovery not published");
            return 0;
        }

        let mut published = 0;
        for (topic, payload) in descriptors(identity, manager.local_address()) {
            match manager
                .publish(&topic, payload.as_bytes(), Qos::AtMostOnce, true)
                .await
            {
                Ok(()) => published += 1,
                Err(e) => error!("Discovery publish failed: {} (payload {})", e, payload),
            }
        }
        info!("Published {} discovery descriptors", published);
        published
    }
}
