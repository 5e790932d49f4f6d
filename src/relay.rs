//! The relay: accepts tunnel clients and broadcasts whatever one of them sends
//! to all the others.
//!
//! The relay never decodes frames. Each chunk a read returns is forwarded
//! verbatim, so the receiving clients' deframing is what restores packet
//! boundaries.

pub mod peer;
pub mod registry;

use std::net::{Ipv4Addr, SocketAddr};

use tokio::{net::TcpListener, select};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    actors::{Actor, Addr},
    common::DEFAULT_PORT,
    error::TunnelError,
    frame::MAX_FRAME_LEN,
};

use self::{
    peer::Peer,
    registry::{Registry, RegistryMessage},
};

/// Largest chunk read from a client in one go: one byte more than the largest frame.
pub const RELAY_CHUNK_LEN: usize = MAX_FRAME_LEN + 1;

pub(crate) const MAILBOX_CAPACITY: usize = 16;

/// The relay's configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to accept tunnel clients on.
    pub listen: SocketAddr,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
        }
    }
}

/// A bound relay, ready to [run](Relay::run).
pub struct Relay {
    listener: TcpListener,
    registry: Registry,
}

impl Relay {
    pub async fn bind(config: &RelayConfig) -> Result<Self, TunnelError> {
        let listener = TcpListener::bind(config.listen).await?;
        Ok(Self {
            listener,
            registry: Registry::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TunnelError> {
        Ok(self.listener.local_addr()?)
    }

    /// Address of the relay's registry, to inspect or manage its peers.
    pub fn registry(&self) -> Addr<RegistryMessage> {
        self.registry.get_addr()
    }

    /// Accepts clients until `cancel` fires or accepting fails.
    ///
    /// Every connection is closed before this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), TunnelError> {
        info!(listen = %self.listener.local_addr()?, "Relay started");
        let cancel = cancel.child_token();
        let registry: Addr<RegistryMessage> = self.registry.get_addr();
        let registry_task = tokio::spawn(self.registry.run(cancel.clone()));

        let result = loop {
            select! {
                _ = cancel.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        info!(peer = %address, "Accepted connection");
                        if let Err(error) = stream.set_nodelay(true) {
                            warn!(peer = %address, %error, "Failed to disable Nagle's algorithm");
                        }
                        let (reader, writer) = stream.into_split();
                        registry.add_peer(Peer::new(address, reader, writer)).await;
                    }
                    Err(error) => {
                        error!(%error, "Failed to accept a connection");
                        break Err(error.into());
                    }
                },
            }
        };

        cancel.cancel();
        if let Err(error) = registry_task.await {
            warn!(%error, "Registry task failed");
        }
        result
    }
}
