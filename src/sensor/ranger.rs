//! # Ultrasonic Range Finder
//!
//! Single-shot ranging over a UART-mode waterproof ultrasonic module
//! (JSN-SR04T mode 5, A02YYUW controlled output).
//!
//! ## Frame Format
//!
//! Writing the trigger byte `0x55` starts one measurement. The module answers
//! with a 4-byte frame:
//!
//! | Byte | Content |
//! |------|---------|
//! | 0 | Header `0xFF` |
//! | 1 | Distance high byte (mm) |
//! | 2 | Distance low byte (mm) |
//! | 3 | Checksum `(0xFF + H + L) & 0xFF` |

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TankBridgeError};
use crate::serial::port_trait::SerialPortIO;

/// Byte that triggers one measurement
pub const TRIGGER_BYTE: u8 = 0x55;

/// Frame header byte
pub const FRAME_HEADER: u8 = 0xFF;

/// Response frame length
pub const FRAME_LEN: usize = 4;

/// One raw ranging measurement
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RangeFinder: Send {
    /// Issue a ranging pulse and wait up to `timeout` for the echo
    ///
    /// # Returns
    ///
    /// Distance in mm, or `None` if no echo arrived in time
    async fn measure(&mut self, timeout: Duration) -> Option<u32>;
}

/// Decode a sensor response frame
///
/// # Arguments
///
/// * `frame` - Complete frame (header, high, low, checksum)
///
/// # Errors
///
/// Returns error if the frame is short, the header is wrong or the checksum
/// does not match
///
/// # Examples
///
/// ```
/// use tank_bridge::sensor::ranger::decode_frame;
///
/// assert_eq!(decode_frame(&[0xFF, 0x01, 0xF4, 0xF4]).unwrap(), 500);
/// ```
pub fn decode_frame(frame: &[u8]) -> Result<u32> {
    if frame.len() < FRAME_LEN {
        return Err(TankBridgeError::Serial(format!(
            "Sensor frame too short: {} bytes",
            frame.len()
        )));
    }

    if frame[0] != FRAME_HEADER {
        return Err(TankBridgeError::Serial(format!(
            "Invalid frame header: 0x{:02X}",
            frame[0]
        )));
    }

    let expected = frame[0].wrapping_add(frame[1]).wrapping_add(frame[2]);
    if expected != frame[3] {
        return Err(TankBridgeError::Serial(format!(
            "Checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected, frame[3]
        )));
    }

    Ok(u32::from(u16::from_be_bytes([frame[1], frame[2]])))
}

/// Shift a rejected frame to the next header inside it
///
/// Returns the number of bytes kept, zero if no later header byte is present.
fn resync(frame: &mut [u8; FRAME_LEN]) -> usize {
    match frame[1..].iter().position(|&b| b == FRAME_HEADER) {
        Some(pos) => {
            let start = pos + 1;
            frame.copy_within(start.., 0);
            FRAME_LEN - start
        }
        None => 0,
    }
}

/// Range finder on a serial port
pub struct SerialRanger<P> {
    port: P,
}

impl<P: SerialPortIO> SerialRanger<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Read bytes until a valid frame arrives
    async fn read_frame(&mut self) -> io::Result<u32> {
        let mut frame = [0u8; FRAME_LEN];
        let mut filled = 0;
        let mut buf = [0u8; 16];

        loop {
            let n = self.port.read(&mut buf).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "sensor port closed",
                ));
            }

            for &byte in &buf[..n] {
                // Hunt for the header before filling a frame
                if filled == 0 && byte != FRAME_HEADER {
                    continue;
                }
                frame[filled] = byte;
                filled += 1;

                if filled == FRAME_LEN {
                    match decode_frame(&frame) {
                        Ok(mm) => return Ok(mm),
                        Err(e) => {
                            debug!("Discarding sensor frame: {}", e);
                            filled = resync(&mut frame);
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<P: SerialPortIO> RangeFinder for SerialRanger<P> {
    async fn measure(&mut self, timeout: Duration) -> Option<u32> {
        // Stale bytes from an earlier timed-out ping would misalign the frame
        if let Err(e) = self.port.clear_input() {
            debug!("Failed to clear sensor input buffer: {}", e);
        }

        if let Err(e) = self.port.write_all(&[TRIGGER_BYTE]).await {
            warn!("Failed to trigger sensor: {}", e);
            return None;
        }
        if let Err(e) = self.port.flush().await {
            warn!("Failed to flush sensor trigger: {}", e);
            return None;
        }

        match tokio::time::timeout(timeout, self.read_frame()).await {
            Ok(Ok(mm)) => Some(mm),
            Ok(Err(e)) => {
                warn!("Sensor read failed: {}", e);
                None
            }
            Err(_) => {
                debug!("No echo within {:?}", timeout);
                None
            }
        }
    }
}

/// A sensor that could not be opened never answers
#[async_trait]
impl<R: RangeFinder> RangeFinder for Option<R> {
    async fn measure(&mut self, timeout: Duration) -> Option<u32> {
        match self {
            Some(ranger) => ranger.measure(timeout).await,
            None => {
                tokio::time::sleep(timeout).await;
                None
            }
        }
    }
}
