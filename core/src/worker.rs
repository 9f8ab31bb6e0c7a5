use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::boot::BootMonitor;
use crate::command::CommandCorrelator;
use crate::error::CaptureError;
use crate::framer::LineFramer;
use crate::line::Line;
use crate::queue::LineQueue;
use crate::transport::TransportReader;

/// How long `close` waits for the line reader thread to exit.
pub const DEFAULT_SHUTDOWN_BOUND: Duration = Duration::from_millis(100);

/// How long `clear` waits for the line reader to pause between reads.
pub const CLEAR_PAUSE_BOUND: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 4096;
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(5);

/// What the line reader thread hands the dispatcher.
#[derive(Debug)]
enum ReaderEvent {
    Line(Line),
    /// Everything sent before this predates a `clear`; `flushed` fires once
    /// the queue has been emptied.
    Cleared { flushed: oneshot::Sender<()> },
}

/// Sent to the line reader thread by [`WorkerHandle::begin_clear`]. The
/// thread stays paused until `resume` fires or is dropped.
#[derive(Debug)]
struct ClearRequest {
    flushed: oneshot::Sender<()>,
    resume: oneshot::Receiver<()>,
}

/// Held by the caller of [`WorkerHandle::begin_clear`] while it resets the
/// transport; dropping it lets the line reader continue.
#[derive(Debug)]
pub(crate) struct ClearPause {
    _resume: oneshot::Sender<()>,
}

/// Everything a framed line is handed to, in delivery order.
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub commands: Arc<CommandCorrelator>,
    pub boot: Arc<BootMonitor>,
    pub queue: Arc<LineQueue>,
}

impl Dispatch {
    fn deliver(&self, line: Line) {
        self.commands.observe(&line);
        self.boot.observe(&line);
        self.queue.push(line);
    }
}

/// The line reader thread plus the dispatcher task of one connection.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    target: String,
    stop: Arc<AtomicBool>,
    cancel: CancellationToken,
    clear_tx: mpsc::UnboundedSender<ClearRequest>,
    reader: Option<thread::JoinHandle<()>>,
    reader_exited: Option<oneshot::Receiver<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(
        target: &str,
        mut reader: Box<dyn TransportReader>,
        dispatch: Dispatch,
        runtime: &Handle,
    ) -> Result<Self, CaptureError> {
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<ReaderEvent>();
        let (clear_tx, mut clear_rx) = mpsc::unbounded_channel::<ClearRequest>();
        let (exited_tx, exited_rx) = oneshot::channel::<()>();
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let reader_stop = Arc::clone(&stop);
        let reader_target = target.to_string();
        let reader_handle = thread::Builder::new()
            .name(format!("capserial-{target}"))
            .spawn(move || {
                // Dropped when the thread ends, which is what close() waits on.
                let _exited = exited_tx;
                let mut framer = LineFramer::new();
                let mut buf = [0u8; READ_BUFFER_SIZE];
                while !reader_stop.load(Ordering::Acquire) {
                    if let Ok(request) = clear_rx.try_recv() {
                        framer.reset();
                        let flushed = request.flushed;
                        if line_tx.send(ReaderEvent::Cleared { flushed }).is_err() {
                            return;
                        }
                        let _ = request.resume.blocking_recv();
                        continue;
                    }
                    match reader.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            for line in framer.push(&buf[..n]) {
                                trace!(target_name = %reader_target, line = %line, "framed line");
                                if line_tx.send(ReaderEvent::Line(line)).is_err() {
                                    return;
                                }
                            }
                        }
                        Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(WOULD_BLOCK_BACKOFF);
                        }
                        Err(e) => {
                            debug!(target_name = %reader_target, "transport read failed: {e}");
                            thread::sleep(READ_ERROR_BACKOFF);
                        }
                    }
                }
                debug!(target_name = %reader_target, "line reader stopped");
            })
            .map_err(CaptureError::worker_spawn)?;

        let dispatcher_cancel = cancel.clone();
        let dispatcher = runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = dispatcher_cancel.cancelled() => break,
                    event = line_rx.recv() => match event {
                        Some(ReaderEvent::Line(line)) => dispatch.deliver(line),
                        Some(ReaderEvent::Cleared { flushed }) => {
                            dispatch.queue.clear();
                            let _ = flushed.send(());
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Self {
            target: target.to_string(),
            stop,
            cancel,
            clear_tx,
            reader: Some(reader_handle),
            reader_exited: Some(exited_rx),
            dispatcher: Some(dispatcher),
        })
    }

    /// Pause the line reader with its partial line discarded and every line
    /// framed so far dropped from the queue. Waits at most `bound` for the
    /// reader to reach the pause; returns `None` if it did not.
    pub async fn begin_clear(&self, bound: Duration) -> Option<ClearPause> {
        let (flushed_tx, flushed_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        let request = ClearRequest {
            flushed: flushed_tx,
            resume: resume_rx,
        };
        if self.clear_tx.send(request).is_err() {
            return None;
        }
        match tokio::time::timeout(bound, flushed_rx).await {
            Ok(Ok(())) => Some(ClearPause { _resume: resume_tx }),
            Ok(Err(_)) | Err(_) => {
                warn!(target_name = %self.target, "line reader did not pause for clear");
                None
            }
        }
    }

    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    /// Stop the dispatcher and wait up to `bound` for the reader thread. A
    /// thread still stuck in the transport after that is left detached.
    pub async fn shutdown(&mut self, bound: Duration) {
        self.signal_stop();

        if let Some(dispatcher) = self.dispatcher.take()
            && let Err(err) = dispatcher.await
        {
            warn!(target_name = %self.target, "dispatcher task failed: {err}");
        }

        let Some(exited) = self.reader_exited.take() else {
            return;
        };
        if tokio::time::timeout(bound, exited).await.is_err() {
            warn!(
                target_name = %self.target,
                bound_ms = bound.as_millis() as u64,
                "line reader did not stop in time; detaching it"
            );
            self.reader = None;
            return;
        }
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!(target_name = %self.target, "line reader panicked");
        }
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.reader
            .as_ref()
            .is_some_and(|reader| !reader.is_finished())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
