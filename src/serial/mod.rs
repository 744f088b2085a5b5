//! # Serial Communication Module
//!
//! Handles the UART link to the ultrasonic distance sensor.
//!
//! This module handles:
//! - Opening the sensor port (9600 baud, 8N1 by default)
//! - Trying candidate device paths in order
//! - Async read/write used by the range finder

pub mod port_trait;

use async_trait::async_trait;
use std::io;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};
use tracing::{debug, info, warn};

use crate::error::{Result, TankBridgeError};
use port_trait::SerialPortIO;

/// Ultrasonic sensor serial port
pub struct SensorSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyS0)
    device_path: String,
}

impl std::fmt::Debug for SensorSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SensorSerial {
    /// Open the sensor port, trying each path in order
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., `["/dev/ttyS0"]`)
    /// * `baud_rate` - Sensor baud rate
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` listing every path if none can be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tank_bridge::serial::SensorSerial;
    ///
    /// # async fn run() -> anyhow::Result<()> {
    /// let serial = SensorSerial::open_with_paths(&["/dev/ttyS0".to_string()], 9600)?;
    /// println!("Sensor on {}", serial.device_path());
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_with_paths(paths: &[String], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open sensor port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened ultrasonic sensor at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.clone(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(TankBridgeError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TankBridgeError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl SerialPortIO for SensorSerial {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}
