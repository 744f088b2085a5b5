//! # Tank Bridge Library
//!
//! Measure the water level in a tank with an ultrasonic sensor and publish it
//! to an MQTT broker, with Home Assistant discovery.
//!
//! This library provides the sensor filtering, the volume model, the Wi-Fi
//! and broker connection state machines, the telemetry and discovery
//! publishers and the connectivity diagnostics used by the `tank-bridge`
//! binary.

pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod runtime;
pub mod sensor;
pub mod serial;
pub mod tank;
pub mod telemetry;
