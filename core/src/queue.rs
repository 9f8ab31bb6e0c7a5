use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::line::Line;

/// Unbounded FIFO of framed lines shared between the dispatcher (producer)
/// and callers (consumers). Every line is handed out at most once.
#[derive(Debug, Default)]
pub struct LineQueue {
    lines: StdMutex<VecDeque<Line>>,
    /// Wakes consumers parked in [`LineQueue::pop_before`] whenever a line is
    /// appended.
    line_notify: Notify,
}

impl LineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: Line) {
        self.lock().push_back(line);
        self.line_notify.notify_waiters();
    }

    pub fn pop_now(&self) -> Option<Line> {
        self.lock().pop_front()
    }

    pub fn drain_now(&self) -> Vec<Line> {
        self.lock().drain(..).collect()
    }

    /// Pop the oldest line, waiting until `deadline` for one to arrive.
    pub async fn pop_before(&self, deadline: Instant) -> Option<Line> {
        loop {
            let notified = self.line_notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if let Some(line) = self.pop_now() {
                return Some(line);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.pop_now(),
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Line>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
