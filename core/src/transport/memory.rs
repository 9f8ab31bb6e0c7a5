use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::time::Duration;

use super::DEFAULT_POLL_INTERVAL;
use super::Transport;
use super::TransportReader;
use super::TransportWriter;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Debug)]
enum Inbound {
    Data(Vec<u8>),
    Error(io::ErrorKind),
}

#[derive(Debug, Default)]
struct InboundQueue {
    items: StdMutex<VecDeque<Inbound>>,
    ready: Condvar,
}

impl InboundQueue {
    fn push(&self, item: Inbound) {
        lock(&self.items).push_back(item);
        self.ready.notify_all();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Outbound {
    bytes: Vec<u8>,
    write_calls: usize,
    flushes: usize,
    input_resets: usize,
    output_resets: usize,
}

#[derive(Default)]
struct Shared {
    inbound: InboundQueue,
    outbound: StdMutex<Outbound>,
    responder: StdMutex<Option<Responder>>,
}

/// Monitor side of an in-process duplex link.
pub struct MemoryTransport {
    shared: Arc<Shared>,
    poll_interval: Duration,
}

/// Target side of a [`MemoryTransport`]: feeds bytes to the monitor and
/// records what the monitor wrote.
#[derive(Clone)]
pub struct MemoryTarget {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryTarget) {
        Self::pair_with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn pair_with_poll_interval(poll_interval: Duration) -> (Self, MemoryTarget) {
        let shared = Arc::new(Shared::default());
        let target = MemoryTarget {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                shared,
                poll_interval,
            },
            target,
        )
    }
}

impl Transport for MemoryTransport {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn split(self: Box<Self>) -> io::Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let reader = MemoryReader {
            shared: Arc::clone(&self.shared),
            poll_interval: self.poll_interval,
        };
        let writer = MemoryWriter {
            shared: self.shared,
        };
        Ok((Box::new(reader), Box::new(writer)))
    }
}

impl MemoryTarget {
    /// Queue `bytes` as one chunk for the monitor to read. Chunks are read
    /// back separately, so feeding a line in pieces exercises framing.
    pub fn feed(&self, bytes: impl AsRef<[u8]>) {
        self.shared
            .inbound
            .push(Inbound::Data(bytes.as_ref().to_vec()));
    }

    /// Make the monitor's next read fail with `kind`.
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        self.shared.inbound.push(Inbound::Error(kind));
    }

    /// Called with the bytes of every write; whatever it returns is fed back.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        *lock(&self.shared.responder) = Some(Box::new(responder));
    }

    /// Everything the monitor has written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.shared.outbound).bytes.clone()
    }

    pub fn write_calls(&self) -> usize {
        lock(&self.shared.outbound).write_calls
    }

    pub fn flushes(&self) -> usize {
        lock(&self.shared.outbound).flushes
    }

    pub fn input_resets(&self) -> usize {
        lock(&self.shared.outbound).input_resets
    }

    pub fn output_resets(&self) -> usize {
        lock(&self.shared.outbound).output_resets
    }

    /// Chunks fed but not yet read by the monitor.
    pub fn unread_chunks(&self) -> usize {
        lock(&self.shared.inbound.items).len()
    }
}

struct MemoryReader {
    shared: Arc<Shared>,
    poll_interval: Duration,
}

impl TransportReader for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inbound = &self.shared.inbound;
        let items = lock(&inbound.items);
        let (mut items, _) = inbound
            .ready
            .wait_timeout_while(items, self.poll_interval, |items| items.is_empty())
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match items.pop_front() {
            None => Ok(0),
            Some(Inbound::Error(kind)) => Err(io::Error::new(kind, "injected read error")),
            Some(Inbound::Data(mut data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                if len < data.len() {
                    items.push_front(Inbound::Data(data.split_off(len)));
                }
                Ok(len)
            }
        }
    }
}

struct MemoryWriter {
    shared: Arc<Shared>,
}

impl TransportWriter for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        {
            let mut outbound = lock(&self.shared.outbound);
            outbound.bytes.extend_from_slice(data);
            outbound.write_calls += 1;
        }
        let reply = lock(&self.shared.responder)
            .as_mut()
            .and_then(|responder| responder(data));
        if let Some(reply) = reply {
            self.shared.inbound.push(Inbound::Data(reply));
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.shared.outbound).flushes += 1;
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        lock(&self.shared.inbound.items).clear();
        lock(&self.shared.outbound).input_resets += 1;
        Ok(())
    }

    fn reset_output_buffer(&mut self) -> io::Result<()> {
        lock(&self.shared.outbound).output_resets += 1;
        Ok(())
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn split(transport: MemoryTransport) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        Box::new(transport).split().expect("split memory transport")
    }

    #[test]
    fn reads_fed_chunks_in_order() {
        let (transport, target) = MemoryTransport::pair();
        let (mut reader, _writer) = split(transport);
        target.feed(b"abc");
        target.feed(b"defgh");

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).expect("read"), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(reader.read(&mut buf).expect("read"), 4);
        assert_eq!(&buf, b"defg");
        assert_eq!(reader.read(&mut buf).expect("read"), 1);
        assert_eq!(&buf[..1], b"h");
    }

    #[test]
    fn empty_read_returns_zero_after_poll_interval() {
        let (transport, _target) =
            MemoryTransport::pair_with_poll_interval(Duration::from_millis(5));
        let (mut reader, _writer) = split(transport);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).expect("read"), 0);
    }

    #[test]
    fn injected_error_surfaces_once() {
        let (transport, target) = MemoryTransport::pair();
        let (mut reader, _writer) = split(transport);
        target.inject_read_error(io::ErrorKind::BrokenPipe);
        target.feed(b"x");

        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).expect_err("injected");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(reader.read(&mut buf).expect("read"), 1);
    }

    #[test]
    fn writer_records_calls_and_triggers_responder() {
        let (transport, target) = MemoryTransport::pair();
        let (mut reader, mut writer) = split(transport);
        target.set_responder(|data| (data == b"ping\n").then(|| b"pong\n".to_vec()));

        assert_eq!(writer.write(b"ping\n").expect("write"), 5);
        assert_eq!(writer.write(b"x").expect("write"), 1);
        assert_eq!(target.written(), b"ping\nx".to_vec());
        assert_eq!(target.write_calls(), 2);

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).expect("read");
        assert_eq!(&buf[..n], b"pong\n");
    }

    #[test]
    fn reset_input_buffer_discards_unread_chunks() {
        let (transport, target) = MemoryTransport::pair();
        let (_reader, mut writer) = split(transport);
        target.feed(b"stale\n");
        writer.reset_input_buffer().expect("reset");
        assert_eq!(target.unread_chunks(), 0);
        assert_eq!(target.input_resets(), 1);
    }
}
