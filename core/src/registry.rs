use indexmap::IndexMap;
use tracing::debug;

use crate::monitor::SerialMonitor;

/// Open monitors keyed by target name, closed together at the end of a
/// session.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    monitors: IndexMap<String, SerialMonitor>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `monitor` under its name, handing back any monitor it
    /// replaces. The replaced monitor is not closed.
    pub fn insert(&mut self, monitor: SerialMonitor) -> Option<SerialMonitor> {
        let name = monitor.name().to_string();
        debug!(target_name = %name, "monitor registered");
        self.monitors.insert(name, monitor)
    }

    pub fn get(&self, name: &str) -> Option<&SerialMonitor> {
        self.monitors.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<SerialMonitor> {
        self.monitors.shift_remove(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.monitors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub async fn close_all(&mut self) {
        for (_, monitor) in self.monitors.drain(..) {
            monitor.close().await;
        }
    }
}
