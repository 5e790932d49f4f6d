//! The tunnel client: bridges a local TUN device and a connection to the relay.

pub mod device;
pub mod pumps;

use std::time::Duration;

use tokio::{
    io::{split, AsyncRead, AsyncWrite},
    net::TcpStream,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    common::{EndOfStreamPolicy, DEFAULT_PORT, DEFAULT_RETRY_INTERVAL},
    error::TunnelError,
};

use self::{
    device::DeviceConfig,
    pumps::{download, upload, DownloadOptions},
};

/// The client's configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name or address of the relay.
    pub server: String,
    pub port: u16,
    pub device: DeviceConfig,
    pub end_of_stream: EndOfStreamPolicy,
    pub retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: DEFAULT_PORT,
            device: DeviceConfig::default(),
            end_of_stream: EndOfStreamPolicy::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl ClientConfig {
    fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            end_of_stream: self.end_of_stream,
            retry_interval: self.retry_interval,
        }
    }
}

/// Represents one end of the tunnel: an interface and a connection to the relay.
pub struct Tunnel<D, S> {
    /// The virtual interface, usually a TUN device.
    device: D,

    /// The connection to the relay.
    stream: S,

    options: DownloadOptions,
}

impl<D, S> Tunnel<D, S>
where
    D: AsyncRead + AsyncWrite + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(device: D, stream: S, options: DownloadOptions) -> Self {
        Self {
            device,
            stream,
            options,
        }
    }

    /// Runs both pumps until they have stopped or `cancel` fires.
    ///
    /// A pump that stops is logged and the other one keeps going. Returns
    /// [TunnelError::Died] when neither is left and no cancellation was
    /// requested.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), TunnelError> {
        let (device_read, device_write) = split(self.device);
        let (stream_read, stream_write) = split(self.stream);

        let mut join_set = JoinSet::new();
        let upload_cancel = cancel.clone();
        join_set.spawn(async move {
            ("upload", upload(device_read, stream_write, upload_cancel).await)
        });
        let download_cancel = cancel.clone();
        let options = self.options;
        join_set.spawn(async move {
            (
                "download",
                download(stream_read, device_write, options, download_cancel).await,
            )
        });

        while let Some(finished) = join_set.join_next().await {
            match finished {
                Ok((pump, Ok(()))) => info!(pump, "Pump stopped"),
                Ok((pump, Err(error))) => error!(pump, %error, "Pump failed"),
                Err(error) => error!(%error, "Pump task failed"),
            }
        }

        if cancel.is_cancelled() {
            Ok(())
        } else {
            Err(TunnelError::Died)
        }
    }
}

/// Opens the TUN device, connects to the relay and runs the tunnel.
pub async fn run_client(config: &ClientConfig, cancel: CancellationToken) -> Result<(), TunnelError> {
    let device = device::open(&config.device)?;
    let stream = TcpStream::connect((config.server.as_str(), config.port)).await?;
    stream.set_nodelay(true)?;

    info!(server = %config.server, port = config.port, "Server address");
    info!(device = %config.device.name, "Local TUN device name");
    info!("Connected to server");

    Tunnel::new(device, stream, config.download_options())
        .run(cancel)
        .await
}
