use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hubtun::{
    client::{
        device::{DeviceConfig, DEFAULT_DEVICE_NAME, MAX_MTU},
        run_client, ClientConfig,
    },
    common::{cancel_on_shutdown_signal, EndOfStreamPolicy, DEFAULT_PORT},
    relay::{Relay, RelayConfig},
};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hubtun")]
#[command(about = "Broadcast IP packets between TUN devices through a TCP relay")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a TUN device and tunnel it through a relay
    Client(ClientArgs),
    /// Accept clients and broadcast their traffic to each other
    Relay(RelayArgs),
}

#[derive(Args)]
struct ClientArgs {
    /// Relay host name or address
    #[arg(short, long, default_value = "localhost")]
    server: String,

    /// Relay port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Local TUN device name
    #[arg(long, default_value = DEFAULT_DEVICE_NAME)]
    dev: String,

    /// IPv4 address to assign to the TUN device
    #[arg(long)]
    address: Option<Ipv4Addr>,

    /// Netmask to assign to the TUN device
    #[arg(long)]
    netmask: Option<Ipv4Addr>,

    /// MTU to set on the TUN device, at most 2048
    #[arg(long, value_parser = clap::value_parser!(u16).range(..=i64::from(MAX_MTU)))]
    mtu: Option<u16>,

    /// What to do when the relay closes the connection: `retry` or `fatal`
    #[arg(long, default_value_t = EndOfStreamPolicy::Retry)]
    on_eof: EndOfStreamPolicy,

    /// Pause between reads after the relay closed the connection, in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_interval_ms: u64,
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            server: args.server,
            port: args.port,
            device: DeviceConfig {
                name: args.dev,
                address: args.address,
                netmask: args.netmask,
                mtu: args.mtu,
            },
            end_of_stream: args.on_eof,
            retry_interval: Duration::from_millis(args.retry_interval_ms),
        }
    }
}

#[derive(Args)]
struct RelayArgs {
    /// Address to accept clients on
    #[arg(short, long, default_value_t = RelayConfig::default().listen)]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug { "hubtun=debug" } else { "hubtun=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    let result = match cli.command {
        Command::Client(args) => {
            let config = ClientConfig::from(args);
            run_client(&config, cancel.clone())
                .await
                .context("Tunnel client stopped")
        }
        Command::Relay(args) => {
            let config = RelayConfig {
                listen: args.listen,
            };
            let relay = Relay::bind(&config)
                .await
                .with_context(|| format!("Failed to listen on {}", config.listen))?;
            relay.run(cancel.clone()).await.context("Relay stopped")
        }
    };

    cancel.cancel();
    match signals.await {
        Ok(Err(error)) => error!(%error, "Failed to listen for shutdown signals"),
        Err(error) => error!(%error, "Signal task failed"),
        Ok(Ok(())) => {}
    }
    result
}
