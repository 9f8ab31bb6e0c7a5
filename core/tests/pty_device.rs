#![cfg(unix)]

use std::io::Read;
use std::io::Write;
use std::time::Duration;

use capserial_core::BootConfig;
use capserial_core::MatchPolicy;
use capserial_core::MonitorConfig;
use capserial_core::SerialMonitor;
use capserial_core::Wait;
use capserial_core::transport::DeviceTransport;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use pretty_assertions::assert_eq;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn monitor_reads_and_writes_through_a_pseudo_terminal() {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        })
        .expect("openpty");
    let tty = pair.master.tty_name().expect("pty device path");

    let transport = DeviceTransport::open(&tty, Some(115_200)).expect("open pty device");
    assert!(transport.is_tty());
    let config = MonitorConfig::new("pty").with_boot(BootConfig::new(
        "START OF BOOT",
        "END OF BOOT",
        Duration::from_secs(5),
    ));
    let monitor = SerialMonitor::open(transport, config).expect("open monitor");

    let mut target_out = pair.master.take_writer().expect("pty writer");
    target_out
        .write_all(b"START OF BOOT\r\nloading\r\nEND OF BOOT\r\n")
        .expect("write boot log");
    target_out.flush().expect("flush boot log");

    assert!(monitor.wait_for_boot_complete().await.expect("bound"));
    let result = monitor
        .read_until("loading", Wait::Within(Duration::from_secs(2)), MatchPolicy::All)
        .await
        .expect("read_until");
    assert!(result.success);
    assert_eq!(result.lines, vec![&b"START OF BOOT\r\n"[..], &b"loading\r\n"[..]]);

    assert_eq!(monitor.write(b"ping\n", None).await.expect("write"), 5);
    monitor.flush().await.expect("flush");
    let mut target_in = pair.master.try_clone_reader().expect("pty reader");
    let echoed = tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 5];
        target_in.read_exact(&mut buf).map(|()| buf)
    })
    .await
    .expect("reader task")
    .expect("read from pty");
    assert_eq!(&echoed, b"ping\n");

    monitor.close().await;
    drop(pair.slave);
}
