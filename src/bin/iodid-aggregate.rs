//! Listens for statsd lines and prints one statistics line per period.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::info;

use iodid::aggregator::{run_receiver, run_rollups, Aggregator};
use iodid::logging::{init_tracing, LogFormat};
use iodid::utils::parse_duration_string;

#[derive(Parser, Debug)]
#[command(name = "iodid-aggregate", version, about = "Aggregates the statsd metrics of a trace run")]
struct AggregatorCli {
    /// UDP port to listen on
    #[arg(short, long, default_value_t = 9000, env = "AGGREGATOR_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "AGGREGATOR_BIND")]
    bind: String,

    /// Rollup period (e.g. 1s, 5s)
    #[arg(long, default_value = "1s", value_parser = parse_duration_string)]
    period: Duration,

    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format
    #[arg(long, value_enum, default_value = "text", env = "LOG_FORMAT")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = AggregatorCli::parse();
    init_tracing(cli.verbose, false, cli.log_format);

    if cli.period.is_zero() {
        eprintln!("Configuration error: --period must be greater than zero");
        std::process::exit(1);
    }

    let ip: IpAddr = cli.bind.parse()?;
    let socket = UdpSocket::bind(SocketAddr::new(ip, cli.port)).await?;

    let aggregator = Arc::new(Aggregator::new());
    tokio::spawn(run_receiver(socket, Arc::clone(&aggregator)));

    tokio::select! {
        _ = run_rollups(aggregator, cli.period, std::io::stdout()) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
