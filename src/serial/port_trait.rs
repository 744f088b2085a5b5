//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read whatever bytes are available, waiting for at least one
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drop any bytes already received but not yet read
    fn clear_input(&mut self) -> io::Result<()>;
}
