mod bridge;
mod bus;
mod error;
mod gateway;
mod heartbeat;
mod host;
mod registry;

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;

/// Bridges SwitchBot IR air conditioners and meters to MQTT.
#[derive(Debug, Parser)]
#[command(name = "switchbot-climate", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "PATH")]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long)]
    pub verbose: bool,

    /// Send one healthcheck request to a running bridge and exit 0 on reply.
    #[arg(long)]
    pub check_heartbeat: bool,

    /// Seconds to wait for the healthcheck reply.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub heartbeat_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    host::init_tracing(cli.verbose);
    match host::run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
