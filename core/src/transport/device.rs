use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::RawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::DEFAULT_POLL_INTERVAL;
use super::Transport;
use super::TransportReader;
use super::TransportWriter;

/// A serial device or pseudo-terminal opened by path.
///
/// Terminals are switched to raw mode so the target's output reaches the
/// framer unmodified. Plain files and pipes are accepted too; buffer resets
/// on them do nothing.
#[derive(Debug)]
pub struct DeviceTransport {
    file: File,
    path: PathBuf,
    is_tty: bool,
    poll_interval: Duration,
}

impl DeviceTransport {
    pub fn open(path: impl AsRef<Path>, baud_rate: Option<u32>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        // O_NONBLOCK keeps open() from waiting on modem control lines.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)?;
        set_blocking(file.as_raw_fd())?;

        let is_tty = unsafe { libc::isatty(file.as_raw_fd()) } == 1;
        if is_tty {
            configure_raw(file.as_raw_fd(), baud_rate)?;
        } else if baud_rate.is_some() {
            debug!(path = %path.display(), "ignoring baud rate for non-terminal device");
        }

        Ok(Self {
            file,
            path,
            is_tty,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }
}

impl Transport for DeviceTransport {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn split(self: Box<Self>) -> io::Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let reader = DeviceReader {
            file: self.file.try_clone()?,
            poll_interval: self.poll_interval,
        };
        let writer = DeviceWriter {
            file: self.file,
            is_tty: self.is_tty,
        };
        Ok((Box::new(reader), Box::new(writer)))
    }
}

struct DeviceReader {
    file: File,
    poll_interval: Duration,
}

impl TransportReader for DeviceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms =
            libc::c_int::try_from(self.poll_interval.as_millis()).unwrap_or(libc::c_int::MAX);
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if ready < 0 {
            return Err(io::Error::last_os_error());
        }
        if ready == 0 {
            return Ok(0);
        }
        if pollfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        if pollfd.revents & libc::POLLIN == 0 {
            // Hang-up with nothing left to read: poll would report it again
            // straight away, so wait out the interval.
            std::thread::sleep(self.poll_interval);
            return Ok(0);
        }

        let read = self.file.read(buf)?;
        if read == 0 {
            std::thread::sleep(self.poll_interval);
        }
        Ok(read)
    }
}

struct DeviceWriter {
    file: File,
    is_tty: bool,
}

impl DeviceWriter {
    fn tcflush(&self, queue: libc::c_int) -> io::Result<()> {
        if !self.is_tty {
            return Ok(());
        }
        cvt(unsafe { libc::tcflush(self.file.as_raw_fd(), queue) })
    }
}

impl TransportWriter for DeviceWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write_all(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.is_tty {
            cvt(unsafe { libc::tcdrain(self.file.as_raw_fd()) })?;
        }
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.tcflush(libc::TCIFLUSH)
    }

    fn reset_output_buffer(&mut self) -> io::Result<()> {
        self.tcflush(libc::TCOFLUSH)
    }
}

fn set_blocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) })
}

fn configure_raw(fd: RawFd, baud_rate: Option<u32>) -> io::Result<()> {
    let mut termios = unsafe { std::mem::zeroed::<libc::termios>() };
    cvt(unsafe { libc::tcgetattr(fd, &mut termios) })?;
    unsafe { libc::cfmakeraw(&mut termios) };
    termios.c_cflag |= libc::CLOCAL | libc::CREAD;
    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;
    if let Some(baud_rate) = baud_rate {
        let speed = baud_constant(baud_rate)?;
        cvt(unsafe { libc::cfsetispeed(&mut termios, speed) })?;
        cvt(unsafe { libc::cfsetospeed(&mut termios, speed) })?;
    }
    cvt(unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) })
}

fn baud_constant(baud_rate: u32) -> io::Result<libc::speed_t> {
    let speed = match baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460_800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921_600 => libc::B921600,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {other}"),
            ));
        }
    };
    Ok(speed)
}

fn cvt(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn common_baud_rates_map_to_constants() {
        assert_eq!(baud_constant(9600).expect("9600"), libc::B9600);
        assert_eq!(baud_constant(115_200).expect("115200"), libc::B115200);
        let err = baud_constant(12_345).expect_err("odd rate");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_device_fails_to_open() {
        let err = DeviceTransport::open("/nonexistent/capserial-tty", None).expect_err("missing");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
