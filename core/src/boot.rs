use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;

use crate::config::BootConfig;
use crate::error::CaptureError;
use crate::line::Line;
use crate::timer::ScheduledTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSignal {
    Started,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootMarkers {
    started: Vec<u8>,
    complete: Vec<u8>,
}

impl BootMarkers {
    pub fn new(started: impl Into<Vec<u8>>, complete: impl Into<Vec<u8>>) -> Self {
        Self {
            started: started.into(),
            complete: complete.into(),
        }
    }

    /// A line carrying both markers counts as a restart.
    pub fn classify(&self, line: &Line) -> Option<BootSignal> {
        if line.contains(&self.started) {
            Some(BootSignal::Started)
        } else if line.contains(&self.complete) {
            Some(BootSignal::Completed)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    NotBooted,
    Booted { since: Instant },
}

impl BootState {
    pub fn is_booted(&self) -> bool {
        matches!(self, Self::Booted { .. })
    }
}

#[derive(Debug)]
struct BootSettings {
    markers: BootMarkers,
    max_boot_time: Duration,
    settle_delay: Duration,
}

#[derive(Debug, Default)]
struct Debounce {
    /// Bumped on every schedule and cancel; a timer only commits if the
    /// generation it was scheduled under is still current.
    generation: u64,
    pending: Option<ScheduledTask>,
}

/// Tracks whether the target has finished booting.
///
/// Lines are fed in by the dispatcher through [`BootMonitor::observe`];
/// callers wait on the state through a `watch` channel so they wake as soon
/// as it changes.
#[derive(Debug)]
pub struct BootMonitor {
    target: String,
    runtime: Handle,
    settings: StdMutex<Option<BootSettings>>,
    debounce: StdMutex<Debounce>,
    state: watch::Sender<BootState>,
}

impl BootMonitor {
    pub fn new(target: impl Into<String>, runtime: Handle) -> Arc<Self> {
        let (state, _) = watch::channel(BootState::NotBooted);
        Arc::new(Self {
            target: target.into(),
            runtime,
            settings: StdMutex::new(None),
            debounce: StdMutex::new(Debounce::default()),
            state,
        })
    }

    /// Install (or replace) the markers and timings. Seeds the booted state
    /// when the configuration asks to assume an already running target.
    pub fn configure(&self, config: &BootConfig) {
        *lock(&self.settings) = Some(BootSettings {
            markers: BootMarkers::new(config.started.clone(), config.complete.clone()),
            max_boot_time: config.max_boot_time,
            settle_delay: config.settle_delay,
        });
        if config.assume_booted_at_start {
            self.mark_booted();
        }
    }

    pub fn observe(self: &Arc<Self>, line: &Line) {
        let (signal, settle_delay) = {
            let settings = lock(&self.settings);
            let Some(settings) = settings.as_ref() else {
                return;
            };
            (settings.markers.classify(line), settings.settle_delay)
        };

        match signal {
            Some(BootSignal::Started) => {
                debug!(target_name = %self.target, "boot started marker seen");
                self.mark_not_booted();
            }
            Some(BootSignal::Completed) if settle_delay.is_zero() => self.mark_booted(),
            Some(BootSignal::Completed) => self.schedule_booted(settle_delay),
            None => {}
        }
    }

    pub fn mark_booted(&self) {
        let mut debounce = lock(&self.debounce);
        debounce.generation = debounce.generation.wrapping_add(1);
        debounce.pending = None;
        self.commit_booted(&debounce);
    }

    pub fn mark_not_booted(&self) {
        let mut debounce = lock(&self.debounce);
        self.cancel_pending(&mut debounce);
        let was_booted = self
            .state
            .send_replace(BootState::NotBooted)
            .is_booted();
        drop(debounce);
        if was_booted {
            info!(target_name = %self.target, "target no longer booted");
        }
    }

    pub fn state(&self) -> BootState {
        *self.state.borrow()
    }

    pub fn is_booted(&self) -> bool {
        self.state().is_booted()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootState> {
        self.state.subscribe()
    }

    /// Seconds since the last transition into `Booted`, zero while not booted.
    pub fn seconds_since_booted(&self) -> f64 {
        match self.state() {
            BootState::Booted { since } => since.elapsed().as_secs_f64(),
            BootState::NotBooted => 0.0,
        }
    }

    /// Wait up to the configured max boot time.
    pub async fn wait_for_boot_complete(&self) -> Result<bool, CaptureError> {
        let bound = lock(&self.settings)
            .as_ref()
            .map(|settings| settings.max_boot_time)
            .ok_or(CaptureError::MissingBootTime)?;
        Ok(self.wait_for_boot_complete_within(bound).await)
    }

    /// Returns immediately when already booted.
    pub async fn wait_for_boot_complete_within(&self, bound: Duration) -> bool {
        let mut state = self.subscribe();
        match tokio::time::timeout(bound, state.wait_for(BootState::is_booted)).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// Cancel any pending debounce so it cannot fire after the connection
    /// has gone away.
    pub fn shutdown(&self) {
        self.cancel_pending(&mut lock(&self.debounce));
    }

    fn schedule_booted(self: &Arc<Self>, delay: Duration) {
        let mut debounce = lock(&self.debounce);
        debounce.generation = debounce.generation.wrapping_add(1);
        let generation = debounce.generation;
        let monitor: Weak<Self> = Arc::downgrade(self);
        debug!(
            target_name = %self.target,
            settle_ms = delay.as_millis() as u64,
            "boot complete marker seen; waiting for target to settle"
        );
        debounce.pending = Some(ScheduledTask::spawn_after(
            &self.runtime,
            delay,
            move || {
                if let Some(monitor) = monitor.upgrade() {
                    monitor.settle_elapsed(generation);
                }
            },
        ));
    }

    fn settle_elapsed(&self, generation: u64) {
        let mut debounce = lock(&self.debounce);
        if debounce.generation != generation {
            return;
        }
        debounce.pending = None;
        self.commit_booted(&debounce);
    }

    fn cancel_pending(&self, debounce: &mut Debounce) {
        debounce.generation = debounce.generation.wrapping_add(1);
        if let Some(pending) = debounce.pending.take() {
            pending.cancel();
            debug!(target_name = %self.target, "pending boot debounce cancelled");
        }
    }

    /// Only called with the debounce lock held, so a concurrent
    /// `mark_not_booted` either lands before the generation check or after
    /// this send.
    fn commit_booted(&self, _debounce: &MutexGuard<'_, Debounce>) {
        self.state.send_replace(BootState::Booted {
            since: Instant::now(),
        });
        info!(target_name = %self.target, "target booted");
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STARTED: &str = "START OF BOOT";
    const COMPLETE: &str = "END OF BOOT";

    fn line(text: &'static str) -> Line {
        Line::from(text.as_bytes())
    }

    fn monitor(settle: Duration) -> Arc<BootMonitor> {
        let monitor = BootMonitor::new("test", Handle::current());
        monitor.configure(
            &BootConfig::new(STARTED, COMPLETE, Duration::from_millis(100))
                .with_settle_delay(settle),
        );
        monitor
    }

    #[test]
    fn started_marker_wins_over_complete_marker() {
        let markers = BootMarkers::new(STARTED, COMPLETE);
        assert_eq!(
            markers.classify(&line("START OF BOOT ... END OF BOOT\n")),
            Some(BootSignal::Started)
        );
        assert_eq!(
            markers.classify(&line("***END OF BOOT***\n")),
            Some(BootSignal::Completed)
        );
        assert_eq!(markers.classify(&line("noise\n")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_without_settle_delay_boots_immediately() {
        let monitor = monitor(Duration::ZERO);
        assert!(!monitor.wait_for_boot_complete().await.expect("bound"));
        assert_eq!(monitor.seconds_since_booted(), 0.0);

        monitor.observe(&line("END OF BOOT\n"));
        assert!(monitor.is_booted());
        assert!(monitor.wait_for_boot_complete().await.expect("bound"));

        monitor.observe(&line("***START OF BOOT***\n"));
        assert!(!monitor.is_booted());
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_defers_booted() {
        let monitor = monitor(Duration::from_secs(1));
        let seen = Instant::now();
        monitor.observe(&line("END OF BOOT\n"));
        assert!(!monitor.is_booted());

        assert!(
            monitor
                .wait_for_boot_complete_within(Duration::from_secs(2))
                .await
        );
        assert!(seen.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn started_marker_within_settle_window_cancels_boot() {
        let monitor = monitor(Duration::from_secs(1));
        monitor.observe(&line("END OF BOOT\n"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        monitor.observe(&line("START OF BOOT\n"));

        assert!(
            !monitor
                .wait_for_boot_complete_within(Duration::from_secs(3))
                .await
        );
        assert_eq!(monitor.state(), BootState::NotBooted);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_not_booted_cancels_pending_debounce() {
        let monitor = monitor(Duration::from_secs(1));
        monitor.observe(&line("END OF BOOT\n"));
        monitor.mark_not_booted();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!monitor.is_booted());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn started_marker_racing_the_settle_timer_leaves_target_not_booted() {
        let settle = Duration::from_micros(200);
        let monitor = monitor(settle);
        for round in 0..500u32 {
            monitor.observe(&line("END OF BOOT\n"));
            // Land the restart on either side of the timer firing.
            std::thread::sleep(settle + Duration::from_micros(u64::from(round % 7) * 20));
            monitor.observe(&line("START OF BOOT\n"));
            assert!(!monitor.is_booted(), "round {round}");

            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(monitor.state(), BootState::NotBooted, "round {round}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_debounce() {
        let monitor = monitor(Duration::from_secs(1));
        monitor.observe(&line("END OF BOOT\n"));
        monitor.shutdown();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!monitor.is_booted());
    }

    #[tokio::test(start_paused = true)]
    async fn assume_booted_at_start_seeds_state() {
        let monitor = BootMonitor::new("test", Handle::current());
        monitor.configure(
            &BootConfig::new(STARTED, COMPLETE, Duration::from_millis(100))
                .assume_booted_at_start(true),
        );
        assert!(monitor.wait_for_boot_complete().await.expect("bound"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(monitor.seconds_since_booted() >= 3.0);
    }

    #[tokio::test]
    async fn unconfigured_monitor_has_no_default_bound() {
        let monitor = BootMonitor::new("test", Handle::current());
        monitor.observe(&line("END OF BOOT\n"));
        assert!(!monitor.is_booted());
        assert!(matches!(
            monitor.wait_for_boot_complete().await,
            Err(CaptureError::MissingBootTime)
        ));
    }
}
