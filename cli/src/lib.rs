pub mod boot_cmd;
pub mod send_cmd;
pub mod watch_cmd;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use capserial_core::MonitorConfig;
use capserial_core::SerialMonitor;
use clap::Args;

/// The device every subcommand talks to.
#[derive(Debug, Args)]
pub struct DeviceArgs {
    /// Serial device or pseudo-terminal, e.g. /dev/ttyUSB0.
    #[arg(value_name = "DEVICE")]
    pub device: PathBuf,

    /// Baud rate to configure; left unchanged when omitted.
    #[arg(long = "baud", value_name = "RATE")]
    pub baud: Option<u32>,
}

impl DeviceArgs {
    pub fn target_name(&self) -> String {
        self.device
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.device.display().to_string())
    }

    #[cfg(unix)]
    pub fn open(&self, config: MonitorConfig) -> Result<SerialMonitor> {
        tracing::debug!(device = %self.device.display(), baud = ?self.baud, "opening device");
        let transport = capserial_core::transport::DeviceTransport::open(&self.device, self.baud)
            .with_context(|| format!("failed to open {}", self.device.display()))?;
        SerialMonitor::open(transport, config)
            .with_context(|| format!("failed to start monitor on {}", self.device.display()))
    }

    #[cfg(not(unix))]
    pub fn open(&self, _config: MonitorConfig) -> Result<SerialMonitor> {
        anyhow::bail!(
            "failed to open {}: device access needs a unix host",
            self.device.display()
        )
    }
}

/// Parses a number of seconds such as `0.5` or `10`.
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("`{value}` is not a valid duration"))
}
