//! Persistent key/value configuration store
//!
//! Typed get/set of named fields, with defaults supplied by the caller when a
//! key is absent. Values written by the setup portal live here and are
//! applied over the settings file at startup via [`super::Config::overlay`].

use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, warn};

use crate::error::{Result, TankBridgeError};

/// Field names used by the setup portal
pub mod keys {
    pub const WIFI_SSID: &str = "wifi_ssid";
    pub const WIFI_PASS: &str = "wifi_pass";
    pub const MQTT_HOST: &str = "mqtt_host";
    pub const MQTT_PORT: &str = "mqtt_port";
    pub const MQTT_USER: &str = "mqtt_user";
    pub const MQTT_PASS: &str = "mqtt_pass";
    pub const CLIENT_ID: &str = "client_id";
    pub const DEVICE_NAME: &str = "device_name";
    pub const DATA_TOPIC: &str = "data_topic";
    pub const STATUS_TOPIC: &str = "status_topic";
    pub const DISCOVERY_ENABLED: &str = "disc_enabled";
    pub const DISCOVERY_PREFIX: &str = "disc_prefix";
    pub const INTERVAL_MINUTES: &str = "interval_min";
    pub const TANK_SHAPE: &str = "tank_shape";
    pub const CYLINDER_DIAMETER: &str = "cyl_diam";
    pub const RECT_LENGTH: &str = "rect_len";
    pub const RECT_WIDTH: &str = "rect_wid";
    pub const CUSTOM_AREA: &str = "custom_area";
    pub const TANK_DEPTH: &str = "tank_depth";
    pub const SENSOR_OFFSET: &str = "sensor_off";
}

/// Typed access to persisted configuration fields
///
/// Implementors provide raw value access; the typed accessors are derived.
/// A stored value of the wrong type or out of range for the requested type
/// is treated as absent and the caller's default is returned.
pub trait ConfigStore {
    /// Raw stored value for `key`
    fn value(&self, key: &str) -> Option<Value>;

    /// Store a raw value under `key`
    fn put(&mut self, key: &str, value: Value) -> Result<()>;

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.value(key) {
            Some(Value::Boolean(b)) => b,
            Some(other) => mistyped(key, &other, default),
            None => default,
        }
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        match self.value(key) {
            Some(Value::String(s)) => s,
            Some(other) => mistyped(key, &other, default.to_string()),
            None => default.to_string(),
        }
    }

    fn get_u8(&self, key: &str, default: u8) -> u8 {
        integer(self, key, default)
    }

    fn get_u16(&self, key: &str, default: u16) -> u16 {
        integer(self, key, default)
    }

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        integer(self, key, default)
    }

    fn get_i32(&self, key: &str, default: i32) -> i32 {
        integer(self, key, default)
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.put(key, Value::Boolean(value))
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.put(key, Value::String(value.to_string()))
    }

    fn set_u8(&mut self, key: &str, value: u8) -> Result<()> {
        self.put(key, Value::Integer(value.into()))
    }

    fn set_u16(&mut self, key: &str, value: u16) -> Result<()> {
        self.put(key, Value::Integer(value.into()))
    }

    fn set_u32(&mut self, key: &str, value: u32) -> Result<()> {
        self.put(key, Value::Integer(value.into()))
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<()> {
        self.put(key, Value::Integer(value.into()))
    }
}

fn integer<S, T>(store: &S, key: &str, default: T) -> T
where
    S: ConfigStore + ?Sized,
    T: TryFrom<i64> + std::fmt::Debug,
{
    match store.value(key) {
        Some(Value::Integer(i)) => T::try_from(i).unwrap_or_else(|_| {
            warn!("Stored value {} for '{}' is out of range, using {:?}", i, key, default);
            default
        }),
        Some(other) => mistyped(key, &other, default),
        None => default,
    }
}

fn mistyped<T: std::fmt::Debug>(key: &str, found: &Value, default: T) -> T {
    warn!(
        "Stored value for '{}' has type {}, using {:?}",
        key,
        found.type_str(),
        default
    );
    default
}

/// Store persisted as a flat TOML table
///
/// Every `put` rewrites the file through a temporary sibling and a rename,
/// so a power cut never leaves a half-written store behind.
#[derive(Debug)]
pub struct TomlConfigStore {
    path: PathBuf,
    table: Table,
}

impl TomlConfigStore {
    /// Open the store at `path`
    ///
    /// A missing file is an empty store. An unparsable file is logged and
    /// treated as empty; it is replaced on the next write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let table = match fs::read_to_string(&path) {
            Ok(contents) => contents.parse::<Table>().unwrap_or_else(|e| {
                warn!("Config store {} is corrupt ({}), starting empty", path.display(), e);
                Table::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config store {} does not exist yet", path.display());
                Table::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, table })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let contents = toml::to_string(&self.table)
            .map_err(|e| TankBridgeError::Store(format!("Failed to encode store: {}", e)))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ConfigStore for TomlConfigStore {
    fn value(&self, key: &str) -> Option<Value> {
        self.table.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Value) -> Result<()> {
        self.table.insert(key.to_string(), value);
        self.persist()
    }
}

/// In-memory store for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    table: Table,
}

#[cfg(test)]
impl ConfigStore for MemoryConfigStore {
    fn value(&self, key: &str) -> Option<Value> {
        self.table.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: Value) -> Result<()> {
        self.table.insert(key.to_string(), value);
        Ok(())
    }
}
