use std::time::Duration;

use anyhow::Result;
use capserial_core::BootConfig;
use capserial_core::MonitorConfig;
use clap::Parser;

use crate::DeviceArgs;
use crate::parse_seconds;

#[derive(Debug, Parser)]
pub struct BootCli {
    #[command(flatten)]
    device: DeviceArgs,

    /// Text of the line printed when the target starts booting.
    #[arg(long = "started", value_name = "TEXT")]
    started: String,

    /// Text of the line printed when boot has finished.
    #[arg(long = "complete", value_name = "TEXT")]
    complete: String,

    #[arg(long = "max-time", value_name = "SECS", value_parser = parse_seconds)]
    max_time: Duration,

    /// Quiet period after the complete line before the target counts as booted.
    #[arg(long = "settle", value_name = "SECS", value_parser = parse_seconds, default_value = "0")]
    settle: Duration,
}

pub async fn run(cli: BootCli) -> Result<bool> {
    let boot =
        BootConfig::new(cli.started, cli.complete, cli.max_time).with_settle_delay(cli.settle);
    let config = MonitorConfig::new(cli.device.target_name()).with_boot(boot);
    let monitor = cli.device.open(config)?;

    let booted = monitor.wait_for_boot_complete().await;
    monitor.close().await;
    let booted = booted?;
    if booted {
        println!("booted");
    } else {
        eprintln!("target did not finish booting within {:?}", cli.max_time);
    }
    Ok(booted)
}
