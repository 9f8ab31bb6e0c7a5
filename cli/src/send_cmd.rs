use std::time::Duration;

use anyhow::Result;
use capserial_core::CommandOptions;
use capserial_core::MonitorConfig;
use clap::Parser;

use crate::DeviceArgs;
use crate::parse_seconds;

#[derive(Debug, Parser)]
pub struct SendCli {
    #[command(flatten)]
    device: DeviceArgs,

    /// Command text; a trailing newline is added unless --raw is given.
    #[arg(value_name = "PAYLOAD")]
    payload: String,

    /// Acknowledgement text to wait for.
    #[arg(long = "expect", value_name = "TEXT")]
    expect: String,

    #[arg(long = "timeout", value_name = "SECS", value_parser = parse_seconds)]
    timeout: Duration,

    #[arg(long = "retries", value_name = "N", default_value_t = 0)]
    retries: u32,

    /// Delay before every written byte.
    #[arg(long = "byte-delay", value_name = "SECS", value_parser = parse_seconds)]
    byte_delay: Option<Duration>,

    /// Send PAYLOAD exactly as given.
    #[arg(long = "raw")]
    raw: bool,
}

impl SendCli {
    fn payload_bytes(&self) -> Vec<u8> {
        let mut bytes = self.payload.as_bytes().to_vec();
        if !self.raw && !bytes.ends_with(b"\n") {
            bytes.push(b'\n');
        }
        bytes
    }
}

pub async fn run(cli: SendCli) -> Result<bool> {
    let monitor = cli
        .device
        .open(MonitorConfig::new(cli.device.target_name()))?;
    let mut options = CommandOptions::new()
        .expect(cli.expect.as_str())
        .timeout(cli.timeout)
        .max_retries(cli.retries);
    if let Some(delay) = cli.byte_delay {
        options = options.byte_delay(delay);
    }

    let acknowledged = monitor.send_command(&cli.payload_bytes(), options).await;
    monitor.close().await;
    let acknowledged = acknowledged?;
    if !acknowledged {
        eprintln!(
            "no acknowledgement after {} attempt(s)",
            u64::from(cli.retries) + 1
        );
    }
    Ok(acknowledged)
}
