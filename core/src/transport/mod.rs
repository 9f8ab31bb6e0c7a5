//! Byte-stream sources a [`crate::SerialMonitor`] can sit on.
//!
//! A transport is split once at open time: the reader half moves onto the
//! line reader thread, the writer half stays with the monitor.

use std::io;
use std::time::Duration;

#[cfg(unix)]
mod device;
mod memory;

#[cfg(unix)]
pub use device::DeviceTransport;
pub use memory::MemoryTarget;
pub use memory::MemoryTransport;

/// How long a transport read may block before reporting "nothing yet".
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub trait Transport: Send + 'static {
    /// Human readable description used in logs.
    fn describe(&self) -> String;

    fn split(self: Box<Self>) -> io::Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)>;
}

pub trait TransportReader: Send + 'static {
    /// Read whatever is available into `buf`, blocking for at most the
    /// transport's poll interval. `Ok(0)` means nothing arrived in that time.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

pub trait TransportWriter: Send + 'static {
    /// Returns how many bytes the transport accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()>;

    /// Discard bytes received but not yet read.
    fn reset_input_buffer(&mut self) -> io::Result<()>;

    /// Discard bytes written but not yet transmitted.
    fn reset_output_buffer(&mut self) -> io::Result<()>;
}
