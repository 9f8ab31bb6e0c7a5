use std::path::PathBuf;

use anyhow::Result;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn capserial() -> Result<assert_cmd::Command> {
    Ok(assert_cmd::Command::cargo_bin("capserial")?)
}

/// A plain file stands in for a device that has already printed `contents`.
fn recorded_console(contents: &[u8]) -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("console.log");
    std::fs::write(&path, contents)?;
    Ok((dir, path))
}

#[test]
fn help_lists_subcommands() -> Result<()> {
    capserial()?
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("watch").and(contains("boot")).and(contains("send")));
    Ok(())
}

#[test]
fn missing_device_is_reported() -> Result<()> {
    capserial()?
        .args(["watch", "/nonexistent/capserial-tty", "--until", "x", "--timeout", "0.1"])
        .assert()
        .failure()
        .stderr(contains("failed to open /nonexistent/capserial-tty"));
    Ok(())
}

#[test]
fn bad_timeout_is_rejected_by_argument_parsing() -> Result<()> {
    capserial()?
        .args(["watch", "/dev/null", "--until", "x", "--timeout", "soon"])
        .assert()
        .failure()
        .stderr(contains("not a number of seconds"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn watch_until_prints_lines_up_to_the_match() -> Result<()> {
    let (_dir, console) =
        recorded_console(b"***LINE1***\n******LINE2******\n*********LINE3*********\n")?;
    capserial()?
        .arg("watch")
        .arg(&console)
        .args(["--until", "LINE2", "--timeout", "2"])
        .assert()
        .success()
        .stdout(contains("LINE1").and(contains("LINE2")).and(contains("LINE3").not()));
    Ok(())
}

#[cfg(unix)]
#[test]
fn watch_until_fails_when_pattern_never_shows_up() -> Result<()> {
    let (_dir, console) = recorded_console(b"booting\n")?;
    capserial()?
        .arg("watch")
        .arg(&console)
        .args(["--until", "READY", "--timeout", "0.2"])
        .assert()
        .code(1)
        .stderr(contains("not found: READY"));
    Ok(())
}

#[cfg(unix)]
#[test]
fn watch_without_patterns_exits_cleanly_on_interrupt() -> Result<()> {
    use std::io::BufRead;
    use std::io::BufReader;
    use std::process::Stdio;
    use std::time::Duration;
    use std::time::Instant;

    let (_dir, console) = recorded_console(b"hello\n")?;
    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("capserial"))
        .arg("watch")
        .arg(&console)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let stdout = child.stdout.take().expect("stdout");
    let mut first = String::new();
    BufReader::new(stdout).read_line(&mut first)?;
    assert_eq!(first, "hello\n");

    let status = std::process::Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()?;
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() > deadline {
            child.kill()?;
            anyhow::bail!("watch did not stop after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(10));
    };
    assert!(status.success(), "{status:?}");
    Ok(())
}

#[cfg(unix)]
#[test]
fn boot_succeeds_once_complete_marker_is_seen() -> Result<()> {
    let (_dir, console) = recorded_console(b"START OF BOOT\nEND OF BOOT\n")?;
    capserial()?
        .arg("boot")
        .arg(&console)
        .args([
            "--started",
            "START OF BOOT",
            "--complete",
            "END OF BOOT",
            "--max-time",
            "2",
        ])
        .assert()
        .success()
        .stdout(contains("booted"));
    Ok(())
}
