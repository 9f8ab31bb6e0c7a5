use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("at least one expected pattern is required")]
    NoPatterns,
    #[error("no {field} given and no default configured for send_command")]
    MissingCommandSetting { field: &'static str },
    #[error("no boot wait bound given and no max boot time configured")]
    MissingBootTime,
    #[error("unframed reads are not supported; use read_received_lines or read_until")]
    UnframedRead,
    #[error("a tokio runtime is required to open a serial monitor")]
    NoRuntime,
    #[error("invalid monitor configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("failed to spawn line reader thread: {error}")]
    WorkerSpawn {
        #[source]
        error: std::io::Error,
    },
}

impl CaptureError {
    pub(crate) fn missing_command_setting(field: &'static str) -> Self {
        Self::MissingCommandSetting { field }
    }

    pub(crate) fn worker_spawn(error: std::io::Error) -> Self {
        Self::WorkerSpawn { error }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse target configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("{field} must not be empty")]
    EmptyMarker { field: &'static str },
}
