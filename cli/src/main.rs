use anyhow::Result;
use capserial_cli::boot_cmd;
use capserial_cli::boot_cmd::BootCli;
use capserial_cli::send_cmd;
use capserial_cli::send_cmd::SendCli;
use capserial_cli::watch_cmd;
use capserial_cli::watch_cmd::WatchCli;
use clap::Parser;
use clap::Subcommand;

/// Watch an embedded target's serial console, wait for it to boot and send
/// it commands.
#[derive(Debug, Parser)]
#[command(name = "capserial", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print received lines, or wait for patterns with --until.
    Watch(WatchCli),
    /// Wait for the boot complete marker.
    Boot(BootCli),
    /// Send a command and wait for its acknowledgement.
    Send(SendCli),
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let success = match cli.command {
        Command::Watch(cli) => watch_cmd::run(cli).await?,
        Command::Boot(cli) => boot_cmd::run(cli).await?,
        Command::Send(cli) => send_cmd::run(cli).await?,
    };
    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
