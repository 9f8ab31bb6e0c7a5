//! Line-oriented monitoring of an embedded target's serial console.
//!
//! [`SerialMonitor`] frames the target's output into lines on a background
//! thread, tracks the boot lifecycle from marker lines, correlates commands
//! with their acknowledgement and answers multi-pattern searches over the
//! lines received so far.

mod boot;
mod command;
mod config;
mod error;
mod framer;
mod line;
mod matcher;
mod monitor;
mod queue;
mod registry;
mod timer;
pub mod transport;
mod worker;

pub use boot::BootMarkers;
pub use boot::BootMonitor;
pub use boot::BootSignal;
pub use boot::BootState;
pub use command::CommandCorrelator;
pub use command::CommandOptions;
pub use config::BootConfig;
pub use config::BootSection;
pub use config::CommandDefaults;
pub use config::MonitorConfig;
pub use config::SerialSection;
pub use config::TargetConfig;
pub use error::CaptureError;
pub use error::ConfigError;
pub use error::Result;
pub use framer::LineFramer;
pub use line::Line;
pub use matcher::Expected;
pub use matcher::MatchPolicy;
pub use matcher::MatchResult;
pub use matcher::PatternSet;
pub use matcher::Wait;
pub use matcher::read_until;
pub use monitor::SerialMonitor;
pub use queue::LineQueue;
pub use registry::MonitorRegistry;
pub use timer::ScheduledTask;
pub use worker::DEFAULT_SHUTDOWN_BOUND;
