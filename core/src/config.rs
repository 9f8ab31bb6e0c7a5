use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Per-connection settings handed to [`crate::SerialMonitor::open`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorConfig {
    pub name: String,
    pub boot: Option<BootConfig>,
    /// Delay inserted before every written byte unless a write overrides it.
    pub write_byte_delay: Option<Duration>,
    pub command: CommandDefaults,
}

impl MonitorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_boot(mut self, boot: BootConfig) -> Self {
        self.boot = Some(boot);
        self
    }

    pub fn with_write_byte_delay(mut self, delay: Duration) -> Self {
        self.write_byte_delay = Some(delay);
        self
    }

    pub fn with_command_defaults(mut self, command: CommandDefaults) -> Self {
        self.command = command;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(boot) = &self.boot {
            boot.validate()?;
        }
        if self.command.expected.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConfigError::EmptyMarker {
                field: "send_command_expected",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootConfig {
    /// Marker of a line printed when the target starts booting.
    pub started: Vec<u8>,
    /// Marker of a line printed when boot has finished.
    pub complete: Vec<u8>,
    /// Default bound for `wait_for_boot_complete`.
    pub max_boot_time: Duration,
    /// Debounce between the complete marker and declaring the target booted.
    /// Zero commits immediately.
    pub settle_delay: Duration,
    pub assume_booted_at_start: bool,
}

impl BootConfig {
    pub fn new(
        started: impl Into<Vec<u8>>,
        complete: impl Into<Vec<u8>>,
        max_boot_time: Duration,
    ) -> Self {
        Self {
            started: started.into(),
            complete: complete.into(),
            max_boot_time,
            settle_delay: Duration::ZERO,
            assume_booted_at_start: false,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn assume_booted_at_start(mut self, assume: bool) -> Self {
        self.assume_booted_at_start = assume;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.started.is_empty() {
            return Err(ConfigError::EmptyMarker {
                field: "started_str",
            });
        }
        if self.complete.is_empty() {
            return Err(ConfigError::EmptyMarker {
                field: "complete_str",
            });
        }
        Ok(())
    }
}

/// Connection-wide fallbacks for `send_command`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandDefaults {
    pub expected: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl CommandDefaults {
    pub fn new(expected: impl Into<Vec<u8>>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            expected: Some(expected.into()),
            timeout: Some(timeout),
            max_retries: Some(max_retries),
        }
    }
}

/// The `[serial]` and `[boot]` tables of a target description file.
///
/// Reading the file is left to the harness; this only parses its text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub boot: Option<BootSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SerialSection {
    #[serde(default)]
    pub port: Option<PathBuf>,
    #[serde(default, alias = "baud_rate")]
    pub baudrate: Option<u32>,
    #[serde(default)]
    pub write_byte_delay: Option<f64>,
    #[serde(default)]
    pub send_command_expected: Option<String>,
    #[serde(default)]
    pub send_command_timeout: Option<f64>,
    #[serde(default)]
    pub send_command_max_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootSection {
    pub started_str: String,
    pub complete_str: String,
    pub max_time: f64,
    #[serde(default)]
    pub wait_time_after_complete: f64,
    #[serde(default)]
    pub assume_booted_at_start: bool,
}

impl TargetConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn monitor_config(&self, name: impl Into<String>) -> Result<MonitorConfig, ConfigError> {
        let serial = &self.serial;
        let write_byte_delay = serial
            .write_byte_delay
            .map(|secs| seconds("write_byte_delay", secs))
            .transpose()?
            // A zero delay means "write in one go", same as leaving it unset.
            .filter(|delay| !delay.is_zero());
        let command = CommandDefaults {
            expected: serial
                .send_command_expected
                .as_ref()
                .map(|expected| expected.as_bytes().to_vec()),
            timeout: serial
                .send_command_timeout
                .map(|secs| seconds("send_command_timeout", secs))
                .transpose()?,
            max_retries: serial.send_command_max_retries,
        };
        let boot = self
            .boot
            .as_ref()
            .map(|boot| -> Result<BootConfig, ConfigError> {
                Ok(BootConfig {
                    started: boot.started_str.as_bytes().to_vec(),
                    complete: boot.complete_str.as_bytes().to_vec(),
                    max_boot_time: seconds("max_time", boot.max_time)?,
                    settle_delay: seconds(
                        "wait_time_after_complete",
                        boot.wait_time_after_complete,
                    )?,
                    assume_booted_at_start: boot.assume_booted_at_start,
                })
            })
            .transpose()?;

        let config = MonitorConfig {
            name: name.into(),
            boot,
            write_byte_delay,
            command,
        };
        config.validate()?;
        Ok(config)
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}
