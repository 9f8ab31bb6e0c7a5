use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::MutexGuard as AsyncMutexGuard;
use tokio::sync::Notify;

use crate::config::CommandDefaults;
use crate::error::CaptureError;
use crate::line::Line;

/// Per-call overrides for `send_command`. Anything left unset falls back to
/// the connection's [`CommandDefaults`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOptions {
    pub expected: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub byte_delay: Option<Duration>,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(mut self, expected: impl Into<Vec<u8>>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn byte_delay(mut self, byte_delay: Duration) -> Self {
        self.byte_delay = Some(byte_delay);
        self
    }

    pub(crate) fn resolve(&self, defaults: &CommandDefaults) -> Result<CommandPlan, CaptureError> {
        let expected = self
            .expected
            .clone()
            .or_else(|| defaults.expected.clone())
            .filter(|expected| !expected.is_empty())
            .ok_or_else(|| CaptureError::missing_command_setting("expected"))?;
        let timeout = self
            .timeout
            .or(defaults.timeout)
            .ok_or_else(|| CaptureError::missing_command_setting("timeout"))?;
        let max_retries = self
            .max_retries
            .or(defaults.max_retries)
            .ok_or_else(|| CaptureError::missing_command_setting("max_retries"))?;
        Ok(CommandPlan {
            expected,
            timeout,
            max_retries,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommandPlan {
    pub expected: Vec<u8>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl CommandPlan {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug)]
struct PendingCommand {
    expected: Vec<u8>,
    acknowledged: Arc<Notify>,
}

/// Matches framed lines against the acknowledgement of the command in
/// flight, if any.
#[derive(Debug, Default)]
pub struct CommandCorrelator {
    pending: StdMutex<Option<PendingCommand>>,
    /// Serializes `send_command` so only one command is pending at a time.
    in_flight: Mutex<()>,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, line: &Line) {
        if let Some(pending) = self.lock().as_ref()
            && line.contains(&pending.expected)
        {
            // notify_one keeps a permit, so an acknowledgement that lands
            // before the caller starts waiting is not lost.
            pending.acknowledged.notify_one();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    pub(crate) async fn begin(&self, expected: Vec<u8>) -> PendingGuard<'_> {
        let serial = self.in_flight.lock().await;
        let acknowledged = Arc::new(Notify::new());
        *self.lock() = Some(PendingCommand {
            expected,
            acknowledged: Arc::clone(&acknowledged),
        });
        PendingGuard {
            correlator: self,
            acknowledged,
            _serial: serial,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingCommand>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Clears the pending command when the send finishes, however it finishes.
pub(crate) struct PendingGuard<'a> {
    correlator: &'a CommandCorrelator,
    acknowledged: Arc<Notify>,
    _serial: AsyncMutexGuard<'a, ()>,
}

impl PendingGuard<'_> {
    /// Wait up to `timeout` for the acknowledgement. Once acknowledged, later
    /// calls return immediately as well.
    pub async fn acknowledged_within(&self, timeout: Duration) -> bool {
        if tokio::time::timeout(timeout, self.acknowledged.notified())
            .await
            .is_err()
        {
            return false;
        }
        // Put the permit back so the outcome is sticky for this command.
        self.acknowledged.notify_one();
        true
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        *self.correlator.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(text: &'static str) -> Line {
        Line::from(text.as_bytes())
    }

    #[test]
    fn call_options_override_defaults() {
        let defaults = CommandDefaults::new("ok", Duration::from_millis(100), 2);
        let plan = CommandOptions::new()
            .expect("done")
            .max_retries(0)
            .resolve(&defaults)
            .expect("resolve");
        assert_eq!(
            plan,
            CommandPlan {
                expected: b"done".to_vec(),
                timeout: Duration::from_millis(100),
                max_retries: 0,
            }
        );
        assert_eq!(plan.attempts(), 1);
    }

    #[test]
    fn missing_settings_are_reported_by_name() {
        let err = CommandOptions::new()
            .expect("ok")
            .max_retries(1)
            .resolve(&CommandDefaults::default())
            .expect_err("no timeout");
        assert!(matches!(
            err,
            CaptureError::MissingCommandSetting { field: "timeout" }
        ));

        let err = CommandOptions::new()
            .timeout(Duration::from_millis(10))
            .max_retries(1)
            .resolve(&CommandDefaults::default())
            .expect_err("no expected");
        assert!(matches!(
            err,
            CaptureError::MissingCommandSetting { field: "expected" }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledgement_before_wait_is_kept() {
        let correlator = CommandCorrelator::new();
        let pending = correlator.begin(b"command successful".to_vec()).await;
        correlator.observe(&line("> command successful\n"));

        assert!(pending.acknowledged_within(Duration::from_millis(10)).await);
        assert!(pending.acknowledged_within(Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_lines_do_not_acknowledge() {
        let correlator = CommandCorrelator::new();
        let pending = correlator.begin(b"command successful".to_vec()).await;
        correlator.observe(&line("command failed\n"));

        assert!(!pending.acknowledged_within(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn pending_command_cleared_when_guard_drops() {
        let correlator = CommandCorrelator::new();
        assert!(!correlator.is_pending());
        {
            let _pending = correlator.begin(b"ok".to_vec()).await;
            assert!(correlator.is_pending());
        }
        assert!(!correlator.is_pending());
        // With nothing pending, lines are ignored.
        correlator.observe(&line("ok\n"));
    }
}
