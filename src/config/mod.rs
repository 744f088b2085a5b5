//! # Configuration Module
//!
//! Handles loading configuration from TOML files and overlaying values
//! written to the persistent [`store::ConfigStore`] by the setup portal.
//!
//! Invalid or missing values never block startup: they are replaced by their
//! documented defaults and a warning is logged.

pub mod store;

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;
use crate::tank::{TankGeometry, TankShape};
use store::{keys, ConfigStore};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub tank: TankConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Device identity and Home Assistant device metadata
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_device_name")]
    pub name: String,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default = "default_model")]
    pub model: String,
}

/// Station network and setup access point configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WifiConfig {
    #[serde(default)]
    pub ssid: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default = "default_ap_ssid")]
    pub ap_ssid: String,

    #[serde(default = "default_ap_password")]
    pub ap_password: String,
}

/// Broker session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Telemetry topic. Empty means `tank/<client_id>/data`.
    #[serde(default)]
    pub data_topic: String,

    /// Availability topic. Empty means `tank/<client_id>/status`.
    #[serde(default)]
    pub status_topic: String,

    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Home Assistant discovery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,

    #[serde(default = "default_discovery_prefix")]
    pub prefix: String,
}

/// Telemetry publishing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u32,
}

/// Tank geometry, all dimensions in millimetres
#[derive(Debug, Deserialize, Clone)]
pub struct TankConfig {
    #[serde(default)]
    pub shape: TankShape,

    #[serde(default)]
    pub cylinder_diameter_mm: u32,

    #[serde(default)]
    pub rect_length_mm: u32,

    #[serde(default)]
    pub rect_width_mm: u32,

    #[serde(default)]
    pub custom_area_mm2: u32,

    #[serde(default = "default_depth_mm")]
    pub depth_mm: u32,

    #[serde(default)]
    pub sensor_offset_mm: i32,
}

/// Ultrasonic sensor serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    /// Device paths tried in order
    #[serde(default = "default_sensor_ports")]
    pub ports: Vec<String>,

    #[serde(default = "default_sensor_baud_rate")]
    pub baud_rate: u32,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files. Empty logs to stdout only.
    #[serde(default)]
    pub dir: String,
}

/// Persistent settings written by the setup portal
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Immutable identity of this device on the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub client_id: String,
    pub discovery_prefix: String,
    pub data_topic: String,
    pub status_topic: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

fn derived_data_topic(client_id: &str) -> String {
    format!("tank/{}/data", client_id)
}

fn derived_status_topic(client_id: &str) -> String {
    format!("tank/{}/status", client_id)
}

// Default value functions
fn default_client_id() -> String { "tank-bridge".to_string() }
fn default_device_name() -> String { "Water Tank".to_string() }
fn default_manufacturer() -> String { "Tank Bridge Project".to_string() }
fn default_model() -> String { "Ultrasonic Tank Sensor".to_string() }

fn default_interface() -> String { "wlan0".to_string() }
fn default_ap_ssid() -> String { "TankBridge-Setup".to_string() }
fn default_ap_password() -> String { "tanksetup".to_string() }

fn default_mqtt_port() -> u16 { 1883 }
fn default_keep_alive_s() -> u16 { 30 }
fn default_connect_timeout_ms() -> u64 { 5000 }

fn default_discovery_enabled() -> bool { true }
fn default_discovery_prefix() -> String { "homeassistant".to_string() }

fn default_interval_minutes() -> u32 { 1 }

fn default_depth_mm() -> u32 { 1000 }

fn default_sensor_ports() -> Vec<String> {
    vec![
        "/dev/ttyS0".to_string(),
        "/dev/ttyUSB0".to_string(),
        "/dev/ttyAMA0".to_string(),
    ]
}
fn default_sensor_baud_rate() -> u32 { 9600 }

fn default_store_path() -> String { "config/settings.toml".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            name: default_device_name(),
            manufacturer: default_manufacturer(),
            model: default_model(),
        }
    }
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            interface: default_interface(),
            ap_ssid: default_ap_ssid(),
            ap_password: default_ap_password(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_mqtt_port(),
            username: String::new(),
            password: String::new(),
            data_topic: String::new(),
            status_topic: String::new(),
            keep_alive_s: default_keep_alive_s(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            prefix: default_discovery_prefix(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
        }
    }
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            shape: TankShape::default(),
            cylinder_diameter_mm: 0,
            rect_length_mm: 0,
            rect_width_mm: 0,
            custom_area_mm2: 0,
            depth_mm: default_depth_mm(),
            sensor_offset_mm: 0,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            ports: default_sensor_ports(),
            baud_rate: default_sensor_baud_rate(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and sanitized configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or TOML parsing fails.
    /// Out-of-range values are not errors; they are replaced by defaults.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tank_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.sanitize();
        Ok(config)
    }

    /// Parse a configuration file without sanitizing it
    ///
    /// Lets the caller set up logging from the file before the sanitize
    /// warnings are emitted.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply values persisted by the setup portal on top of this configuration
    ///
    /// Keys absent from the store keep the current value. The result is
    /// sanitized again, so a malformed stored value falls back to its default.
    pub fn overlay(&mut self, store: &dyn ConfigStore) {
        self.wifi.ssid = store.get_string(keys::WIFI_SSID, &self.wifi.ssid);
        self.wifi.password = store.get_string(keys::WIFI_PASS, &self.wifi.password);

        self.mqtt.host = store.get_string(keys::MQTT_HOST, &self.mqtt.host);
        self.mqtt.port = store.get_u16(keys::MQTT_PORT, self.mqtt.port);
        self.mqtt.username = store.get_string(keys::MQTT_USER, &self.mqtt.username);
        self.mqtt.password = store.get_string(keys::MQTT_PASS, &self.mqtt.password);

        // Topics derived from the previous client id follow a stored one
        let previous_id = self.device.client_id.clone();
        self.device.client_id = store.get_string(keys::CLIENT_ID, &previous_id);
        if self.device.client_id != previous_id {
            if self.mqtt.data_topic == derived_data_topic(&previous_id) {
                self.mqtt.data_topic.clear();
            }
            if self.mqtt.status_topic == derived_status_topic(&previous_id) {
                self.mqtt.status_topic.clear();
            }
        }
        self.mqtt.data_topic = store.get_string(keys::DATA_TOPIC, &self.mqtt.data_topic);
        self.mqtt.status_topic = store.get_string(keys::STATUS_TOPIC, &self.mqtt.status_topic);

        self.device.name = store.get_string(keys::DEVICE_NAME, &self.device.name);

        self.discovery.enabled = store.get_bool(keys::DISCOVERY_ENABLED, self.discovery.enabled);
        self.discovery.prefix = store.get_string(keys::DISCOVERY_PREFIX, &self.discovery.prefix);

        self.telemetry.interval_minutes =
            store.get_u32(keys::INTERVAL_MINUTES, self.telemetry.interval_minutes);

        let shape = store.get_u8(keys::TANK_SHAPE, self.tank.shape.code());
        self.tank.shape = TankShape::from_code(shape).unwrap_or_else(|| {
            warn!("Stored tank shape {} is unknown, keeping {:?}", shape, self.tank.shape);
            self.tank.shape
        });
        self.tank.cylinder_diameter_mm =
            store.get_u32(keys::CYLINDER_DIAMETER, self.tank.cylinder_diameter_mm);
        self.tank.rect_length_mm = store.get_u32(keys::RECT_LENGTH, self.tank.rect_length_mm);
        self.tank.rect_width_mm = store.get_u32(keys::RECT_WIDTH, self.tank.rect_width_mm);
        self.tank.custom_area_mm2 = store.get_u32(keys::CUSTOM_AREA, self.tank.custom_area_mm2);
        self.tank.depth_mm = store.get_u32(keys::TANK_DEPTH, self.tank.depth_mm);
        self.tank.sensor_offset_mm = store.get_i32(keys::SENSOR_OFFSET, self.tank.sensor_offset_mm);

        self.sanitize();
    }

    /// Replace invalid values with their defaults
    ///
    /// # Returns
    ///
    /// Number of values that were substituted
    pub fn sanitize(&mut self) -> usize {
        let mut substituted = 0;

        if self.device.client_id.trim().is_empty() {
            warn!("device.client_id is empty, using '{}'", default_client_id());
            self.device.client_id = default_client_id();
            substituted += 1;
        }

        if self.device.name.trim().is_empty() {
            warn!("device.name is empty, using '{}'", default_device_name());
            self.device.name = default_device_name();
            substituted += 1;
        }

        if self.mqtt.port == 0 {
            warn!("mqtt.port 0 is invalid, using {}", default_mqtt_port());
            self.mqtt.port = default_mqtt_port();
            substituted += 1;
        }

        if self.mqtt.keep_alive_s == 0 {
            warn!("mqtt.keep_alive_s 0 is invalid, using {}", default_keep_alive_s());
            self.mqtt.keep_alive_s = default_keep_alive_s();
            substituted += 1;
        }

        if self.mqtt.connect_timeout_ms == 0 || self.mqtt.connect_timeout_ms > 60000 {
            warn!(
                "mqtt.connect_timeout_ms {} must be between 1 and 60000, using {}",
                self.mqtt.connect_timeout_ms,
                default_connect_timeout_ms()
            );
            self.mqtt.connect_timeout_ms = default_connect_timeout_ms();
            substituted += 1;
        }

        // Empty topics are the normal way to ask for the derived names
        if self.mqtt.data_topic.trim().is_empty() {
            self.mqtt.data_topic = derived_data_topic(&self.device.client_id);
            debug!("Derived data topic {}", self.mqtt.data_topic);
        }
        if self.mqtt.status_topic.trim().is_empty() {
            self.mqtt.status_topic = derived_status_topic(&self.device.client_id);
            debug!("Derived status topic {}", self.mqtt.status_topic);
        }

        if self.discovery.prefix.trim().is_empty() {
            warn!("discovery.prefix is empty, using '{}'", default_discovery_prefix());
            self.discovery.prefix = default_discovery_prefix();
            substituted += 1;
        }

        if self.telemetry.interval_minutes == 0 {
            warn!(
                "telemetry.interval_minutes 0 is invalid, using {}",
                default_interval_minutes()
            );
            self.telemetry.interval_minutes = default_interval_minutes();
            substituted += 1;
        }

        if self.wifi.interface.trim().is_empty() {
            warn!("wifi.interface is empty, using '{}'", default_interface());
            self.wifi.interface = default_interface();
            substituted += 1;
        }

        // WPA2 passphrases are 8-63 characters
        if !(8..=63).contains(&self.wifi.ap_password.len()) {
            warn!("wifi.ap_password must be 8-63 characters, using the default");
            self.wifi.ap_password = default_ap_password();
            substituted += 1;
        }

        if self.sensor.ports.iter().all(|p| p.trim().is_empty()) {
            warn!("sensor.ports is empty, using defaults");
            self.sensor.ports = default_sensor_ports();
            substituted += 1;
        }

        if self.sensor.baud_rate == 0 {
            warn!("sensor.baud_rate 0 is invalid, using {}", default_sensor_baud_rate());
            self.sensor.baud_rate = default_sensor_baud_rate();
            substituted += 1;
        }

        if self.store.path.trim().is_empty() {
            warn!("store.path is empty, using '{}'", default_store_path());
            self.store.path = default_store_path();
            substituted += 1;
        }

        if self.tank.depth_mm == 0 {
            // Percent stays undefined until the depth is configured
            warn!("tank.depth_mm is 0, level percent will be unavailable");
        }

        substituted
    }

    /// Identity used for topics, client id and discovery metadata
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            client_id: self.device.client_id.clone(),
            discovery_prefix: self.discovery.prefix.clone(),
            data_topic: self.mqtt.data_topic.clone(),
            status_topic: self.mqtt.status_topic.clone(),
            name: self.device.name.clone(),
            manufacturer: self.device.manufacturer.clone(),
            model: self.device.model.clone(),
        }
    }

    /// Tank geometry for the volume model
    pub fn geometry(&self) -> TankGeometry {
        TankGeometry {
            shape: self.tank.shape,
            cylinder_diameter_mm: self.tank.cylinder_diameter_mm,
            rect_length_mm: self.tank.rect_length_mm,
            rect_width_mm: self.tank.rect_width_mm,
            custom_area_mm2: self.tank.custom_area_mm2,
            depth_mm: self.tank.depth_mm,
            sensor_offset_mm: self.tank.sensor_offset_mm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use store::MemoryConfigStore;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> Config {
        let mut config = Config::default();
        config.sanitize();
        config
    }

    #[test]
    fn test_default_config_needs_no_substitution() {
        let mut config = Config::default();
        assert_eq!(config.sanitize(), 0);
        assert_eq!(config.mqtt.data_topic, "tank/tank-bridge/data");
        assert_eq!(config.mqtt.status_topic, "tank/tank-bridge/status");
    }

    #[test]
    fn test_load_config_from_file() {
        let toml_content = r#"
[device]
client_id = "tank-garden"

[wifi]
ssid = "home"
password = "secret123"

[mqtt]
host = "broker.local"
port = 1884

[tank]
shape = "cylinder"
cylinder_diameter_mm = 1000
depth_mm = 1500
sensor_offset_mm = 25
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.device.client_id, "tank-garden");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.data_topic, "tank/tank-garden/data");
        assert_eq!(config.tank.shape, TankShape::Cylinder);
        assert_eq!(config.tank.depth_mm, 1500);
        assert_eq!(config.telemetry.interval_minutes, 1);
        assert!(config.discovery.enabled);
    }

    #[test]
    fn test_load_empty_file_gives_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.device.client_id, "tank-bridge");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.discovery.prefix, "homeassistant");
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[mqtt\nport = ").unwrap();
        temp_file.flush().unwrap();
        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        assert!(Config::load("/nonexistent/tank-bridge.toml").is_err());
    }

    #[test]
    fn test_interval_zero_substituted() {
        let mut config = create_valid_config();
        config.telemetry.interval_minutes = 0;
        assert_eq!(config.sanitize(), 1);
        assert_eq!(config.telemetry.interval_minutes, 1);
    }

    #[test]
    fn test_port_zero_substituted() {
        let mut config = create_valid_config();
        config.mqtt.port = 0;
        assert_eq!(config.sanitize(), 1);
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_connect_timeout_out_of_range_substituted() {
        let mut config = create_valid_config();
        config.mqtt.connect_timeout_ms = 60001;
        assert_eq!(config.sanitize(), 1);
        assert_eq!(config.mqtt.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_empty_client_id_substituted_before_topics_derived() {
        let mut config = Config::default();
        config.device.client_id = "  ".to_string();
        assert_eq!(config.sanitize(), 1);
        assert_eq!(config.device.client_id, "tank-bridge");
        assert_eq!(config.mqtt.status_topic, "tank/tank-bridge/status");
    }

    #[test]
    fn test_explicit_topics_kept() {
        let mut config = Config::default();
        config.mqtt.data_topic = "site/tank1".to_string();
        config.mqtt.status_topic = "site/tank1/avail".to_string();
        config.sanitize();
        assert_eq!(config.mqtt.data_topic, "site/tank1");
        assert_eq!(config.mqtt.status_topic, "site/tank1/avail");
    }

    #[test]
    fn test_short_ap_password_substituted() {
        let mut config = create_valid_config();
        config.wifi.ap_password = "short".to_string();
        assert_eq!(config.sanitize(), 1);
        assert_eq!(config.wifi.ap_password, "tanksetup");
    }

    #[test]
    fn test_empty_sensor_ports_substituted() {
        let mut config = create_valid_config();
        config.sensor.ports = vec![String::new()];
        assert_eq!(config.sanitize(), 1);
        assert_eq!(config.sensor.ports.len(), 3);
    }

    #[test]
    fn test_zero_depth_is_kept() {
        let mut config = create_valid_config();
        config.tank.depth_mm = 0;
        assert_eq!(config.sanitize(), 0);
        assert_eq!(config.tank.depth_mm, 0);
    }

    #[test]
    fn test_overlay_applies_stored_values() {
        let mut store = MemoryConfigStore::default();
        store.set_string(keys::WIFI_SSID, "portal-net").unwrap();
        store.set_u16(keys::MQTT_PORT, 8883).unwrap();
        store.set_u8(keys::TANK_SHAPE, TankShape::Rectangular.code()).unwrap();
        store.set_u32(keys::RECT_LENGTH, 2000).unwrap();
        store.set_u32(keys::RECT_WIDTH, 1000).unwrap();
        store.set_i32(keys::SENSOR_OFFSET, -10).unwrap();
        store.set_bool(keys::DISCOVERY_ENABLED, false).unwrap();

        let mut config = create_valid_config();
        config.overlay(&store);

        assert_eq!(config.wifi.ssid, "portal-net");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.tank.shape, TankShape::Rectangular);
        assert_eq!(config.tank.rect_length_mm, 2000);
        assert_eq!(config.tank.sensor_offset_mm, -10);
        assert!(!config.discovery.enabled);
        // Untouched keys keep the file value
        assert_eq!(config.mqtt.keep_alive_s, 30);
    }

    #[test]
    fn test_overlay_invalid_stored_values_fall_back() {
        let mut store = MemoryConfigStore::default();
        store.set_u16(keys::MQTT_PORT, 0).unwrap();
        store.set_u8(keys::TANK_SHAPE, 9).unwrap();
        store.set_u32(keys::INTERVAL_MINUTES, 0).unwrap();

        let mut config = create_valid_config();
        config.tank.shape = TankShape::Cylinder;
        config.overlay(&store);

        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.tank.shape, TankShape::Cylinder);
        assert_eq!(config.telemetry.interval_minutes, 1);
    }

    #[test]
    fn test_overlay_client_id_rederives_topics() {
        let mut store = MemoryConfigStore::default();
        store.set_string(keys::CLIENT_ID, "pump1").unwrap();

        let mut config = Config::default();
        config.sanitize();
        assert_eq!(config.mqtt.data_topic, "tank/tank-bridge/data");
        config.overlay(&store);

        let identity = config.identity();
        assert_eq!(identity.client_id, "pump1");
        assert_eq!(identity.data_topic, "tank/pump1/data");
        assert_eq!(identity.status_topic, "tank/pump1/status");
    }

    #[test]
    fn test_overlay_client_id_keeps_explicit_topics() {
        let mut store = MemoryConfigStore::default();
        store.set_string(keys::CLIENT_ID, "pump1").unwrap();
        store.set_string(keys::STATUS_TOPIC, "site/pump/availability").unwrap();

        let mut config = Config::default();
        config.mqtt.data_topic = "site/pump/level".to_string();
        config.sanitize();
        config.overlay(&store);

        assert_eq!(config.mqtt.data_topic, "site/pump/level");
        assert_eq!(config.mqtt.status_topic, "site/pump/availability");
    }

    #[test]
    fn test_identity_and_geometry() {
        let mut config = create_valid_config();
        config.tank.shape = TankShape::Cylinder;
        config.tank.cylinder_diameter_mm = 1000;
        config.tank.depth_mm = 1500;

        let identity = config.identity();
        assert_eq!(identity.client_id, "tank-bridge");
        assert_eq!(identity.discovery_prefix, "homeassistant");
        assert_eq!(identity.data_topic, "tank/tank-bridge/data");

        let geometry = config.geometry();
        assert_eq!(geometry.shape, TankShape::Cylinder);
        assert_eq!(geometry.depth_mm, 1500);
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_client_id(), "tank-bridge");
        assert_eq!(default_mqtt_port(), 1883);
        assert_eq!(default_keep_alive_s(), 30);
        assert_eq!(default_connect_timeout_ms(), 5000);
        assert_eq!(default_discovery_prefix(), "homeassistant");
        assert_eq!(default_interval_minutes(), 1);
        assert_eq!(default_sensor_baud_rate(), 9600);
        assert_eq!(default_interface(), "wlan0");
        assert!(default_discovery_enabled());
    }

    #[test]
    fn test_shipped_default_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let mut config = Config::read(path).unwrap();
        assert_eq!(config.sanitize(), 0);
        assert_eq!(config.tank.depth_mm, 1500);
        assert_eq!(config.store.path, "config/settings.toml");
        assert_eq!(config.mqtt.status_topic, "tank/tank-bridge/status");
    }

    #[test]
    fn test_read_does_not_sanitize() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[telemetry]\ninterval_minutes = 0\n").unwrap();
        temp_file.flush().unwrap();

        let config = Config::read(temp_file.path()).unwrap();
        assert_eq!(config.telemetry.interval_minutes, 0);
        assert!(config.mqtt.data_topic.is_empty());

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.telemetry.interval_minutes, 1);
    }
}
