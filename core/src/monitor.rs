use std::io;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use crate::boot::BootMonitor;
use crate::boot::BootState;
use crate::command::CommandCorrelator;
use crate::command::CommandOptions;
use crate::config::BootConfig;
use crate::config::MonitorConfig;
use crate::error::CaptureError;
use crate::error::Result;
use crate::line::Line;
use crate::matcher;
use crate::matcher::Expected;
use crate::matcher::MatchPolicy;
use crate::matcher::MatchResult;
use crate::matcher::Wait;
use crate::queue::LineQueue;
use crate::transport::Transport;
use crate::transport::TransportWriter;
use crate::worker::CLEAR_PAUSE_BOUND;
use crate::worker::DEFAULT_SHUTDOWN_BOUND;
use crate::worker::Dispatch;
use crate::worker::WorkerHandle;

type SharedWriter = Arc<StdMutex<Box<dyn TransportWriter>>>;

/// A line-oriented view of one target's byte stream.
///
/// Opening a monitor starts a background reader that frames everything the
/// target prints into [`Line`]s. Each line is checked against the pending
/// command and the boot markers, then queued for [`SerialMonitor::read_until`]
/// and [`SerialMonitor::read_received_lines`].
///
/// Must be opened from within a tokio runtime.
pub struct SerialMonitor {
    config: MonitorConfig,
    description: String,
    writer: SharedWriter,
    /// Keeps byte-delayed writes from interleaving.
    write_gate: Mutex<()>,
    queue: Arc<LineQueue>,
    boot: Arc<BootMonitor>,
    commands: Arc<CommandCorrelator>,
    worker: WorkerHandle,
}

impl SerialMonitor {
    pub fn open(transport: impl Transport, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| CaptureError::NoRuntime)?;

        let description = transport.describe();
        let (reader, writer) = Box::new(transport).split()?;

        let boot = BootMonitor::new(config.name.clone(), runtime.clone());
        if let Some(boot_config) = &config.boot {
            boot.configure(boot_config);
        }
        let queue = Arc::new(LineQueue::new());
        let commands = Arc::new(CommandCorrelator::new());
        let dispatch = Dispatch {
            commands: Arc::clone(&commands),
            boot: Arc::clone(&boot),
            queue: Arc::clone(&queue),
        };
        let worker = WorkerHandle::spawn(&config.name, reader, dispatch, &runtime)?;
        info!(target_name = %config.name, transport = %description, "serial monitor opened");

        Ok(Self {
            config,
            description,
            writer: Arc::new(StdMutex::new(writer)),
            write_gate: Mutex::new(()),
            queue,
            boot,
            commands,
            worker,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Write `data`, sleeping `byte_delay` (or the configured write delay)
    /// before every byte. Returns the number of bytes the transport accepted.
    pub async fn write(&self, data: &[u8], byte_delay: Option<Duration>) -> Result<usize> {
        let delay = byte_delay
            .or(self.config.write_byte_delay)
            .filter(|delay| !delay.is_zero());
        let _gate = self.write_gate.lock().await;

        let Some(delay) = delay else {
            let data = data.to_vec();
            return self.with_writer(move |writer| writer.write(&data)).await;
        };
        let mut written = 0;
        for &byte in data {
            tokio::time::sleep(delay).await;
            written += self.with_writer(move |writer| writer.write(&[byte])).await?;
        }
        Ok(written)
    }

    pub async fn flush(&self) -> Result<()> {
        self.with_writer(TransportWriter::flush).await
    }

    /// Write `data` and wait for a line containing the expected
    /// acknowledgement, rewriting it up to `max_retries` more times.
    ///
    /// Returns `Ok(false)` when every attempt timed out. Calls on the same
    /// monitor run one after another.
    pub async fn send_command(&self, data: &[u8], options: CommandOptions) -> Result<bool> {
        let plan = options.resolve(&self.config.command)?;
        let pending = self.commands.begin(plan.expected.clone()).await;

        for attempt in 1..=plan.attempts() {
            self.write(data, options.byte_delay).await?;
            if pending.acknowledged_within(plan.timeout).await {
                info!(target_name = %self.name(), attempt, "command acknowledged");
                return Ok(true);
            }
            debug!(
                target_name = %self.name(),
                attempt,
                attempts = plan.attempts(),
                "no acknowledgement within {:?}",
                plan.timeout
            );
        }
        Ok(false)
    }

    /// Drop buffered transport input and output, every queued line and any
    /// partial line not yet terminated.
    pub async fn clear(&self) -> Result<()> {
        let pause = self.worker.begin_clear(CLEAR_PAUSE_BOUND).await;
        self.with_writer(|writer| {
            writer.reset_input_buffer()?;
            writer.reset_output_buffer()
        })
        .await?;
        self.queue.clear();
        drop(pause);
        debug!(target_name = %self.name(), "buffers cleared");
        Ok(())
    }

    pub fn read_received_lines(&self) -> Vec<Line> {
        self.queue.drain_now()
    }

    pub fn pending_lines(&self) -> usize {
        self.queue.len()
    }

    /// Take the oldest queued line, waiting up to `bound` for one to arrive.
    pub async fn next_line(&self, bound: Duration) -> Option<Line> {
        self.queue
            .pop_before(tokio::time::Instant::now() + bound)
            .await
    }

    pub async fn read_until(
        &self,
        expected: impl Into<Expected>,
        wait: Wait,
        policy: MatchPolicy,
    ) -> Result<MatchResult> {
        matcher::read_until(&self.queue, &expected.into(), wait, policy).await
    }

    /// Reading bytes past the framer would desynchronise the line queue, so
    /// this always fails.
    pub fn read_raw(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(CaptureError::UnframedRead)
    }

    pub fn configure_boot(&self, boot: BootConfig) -> Result<()> {
        boot.validate()?;
        self.boot.configure(&boot);
        Ok(())
    }

    pub fn mark_booted(&self) {
        self.boot.mark_booted();
    }

    pub fn mark_not_booted(&self) {
        self.boot.mark_not_booted();
    }

    pub fn is_booted(&self) -> bool {
        self.boot.is_booted()
    }

    pub fn boot_state(&self) -> BootState {
        self.boot.state()
    }

    /// Follow boot state transitions; the receiver outlives the monitor.
    pub fn subscribe_boot(&self) -> watch::Receiver<BootState> {
        self.boot.subscribe()
    }

    pub async fn wait_for_boot_complete(&self) -> Result<bool> {
        self.boot.wait_for_boot_complete().await
    }

    pub async fn wait_for_boot_complete_within(&self, bound: Duration) -> bool {
        self.boot.wait_for_boot_complete_within(bound).await
    }

    pub fn seconds_since_booted(&self) -> f64 {
        self.boot.seconds_since_booted()
    }

    pub async fn close(self) {
        self.close_within(DEFAULT_SHUTDOWN_BOUND).await;
    }

    /// Stop the reader, waiting at most `bound` for it to exit.
    pub async fn close_within(mut self, bound: Duration) {
        self.worker.shutdown(bound).await;
        self.boot.shutdown();
        info!(target_name = %self.name(), "serial monitor closed");
    }

    async fn with_writer<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut (dyn TransportWriter + 'static)) -> io::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let writer = Arc::clone(&self.writer);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            op(&mut **writer)
        })
        .await
        .map_err(io::Error::other)?;
        Ok(outcome?)
    }
}

impl std::fmt::Debug for SerialMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialMonitor")
            .field("name", &self.config.name)
            .field("transport", &self.description)
            .field("pending_lines", &self.queue.len())
            .field("boot_state", &self.boot.state())
            .finish_non_exhaustive()
    }
}

impl Drop for SerialMonitor {
    fn drop(&mut self) {
        self.worker.signal_stop();
        self.boot.shutdown();
    }
}
