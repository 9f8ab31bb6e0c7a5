use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use capserial_core::MatchPolicy;
use capserial_core::MonitorConfig;
use capserial_core::SerialMonitor;
use capserial_core::Wait;
use clap::Parser;
use tokio::io::AsyncWriteExt;

use crate::DeviceArgs;
use crate::parse_seconds;

const LINE_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
pub struct WatchCli {
    #[command(flatten)]
    device: DeviceArgs,

    /// Stop once a line containing PATTERN has been seen. Repeatable.
    #[arg(long = "until", value_name = "PATTERN")]
    until: Vec<String>,

    /// With several --until patterns, stop at the first one found.
    #[arg(long = "any", requires = "until")]
    any: bool,

    /// Give up on --until after SECS seconds.
    #[arg(
        long = "timeout",
        value_name = "SECS",
        value_parser = parse_seconds,
        default_value = "10"
    )]
    timeout: Duration,
}

/// Returns whether every `--until` pattern was found; plain watching ends on
/// Ctrl-C and counts as success.
pub async fn run(cli: WatchCli) -> Result<bool> {
    let monitor = cli
        .device
        .open(MonitorConfig::new(cli.device.target_name()))?;
    let outcome = if cli.until.is_empty() {
        follow(&monitor).await.map(|()| true)
    } else {
        wait_for_patterns(&monitor, &cli).await
    };
    monitor.close().await;
    outcome
}

async fn follow(monitor: &SerialMonitor) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            biased;
            _ = &mut ctrl_c => return Ok(()),
            line = monitor.next_line(LINE_WAIT) => {
                if let Some(line) = line {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.flush().await?;
                }
            }
        }
    }
}

async fn wait_for_patterns(monitor: &SerialMonitor, cli: &WatchCli) -> Result<bool> {
    let policy = if cli.any {
        MatchPolicy::Any
    } else {
        MatchPolicy::All
    };
    let result = monitor
        .read_until(
            cli.until.iter().map(String::as_str).collect::<Vec<_>>(),
            Wait::Within(cli.timeout),
            policy,
        )
        .await
        .context("read_until failed")?;

    let mut stdout = tokio::io::stdout();
    for line in &result.lines {
        stdout.write_all(line.as_bytes()).await?;
    }
    stdout.flush().await?;
    for pattern in result.pattern_set.missing() {
        eprintln!("not found: {}", String::from_utf8_lossy(pattern));
    }
    Ok(result.success)
}
