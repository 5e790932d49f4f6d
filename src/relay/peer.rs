//! Module for [Peer] actor.
//!
//! It is responsible for moving raw bytes to and from one relay client.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::actors::{mailbox, Actor, Addr};

use super::{registry::Chunk, MAILBOX_CAPACITY, RELAY_CHUNK_LEN};

type PeerReader = Box<dyn AsyncRead + Send + Unpin>;
type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Represents one connected client of the relay.
pub struct Peer {
    /// Remote address of the client; identifies the peer in the registry.
    address: SocketAddr,

    /// The address used to hand chunks to this peer for forwarding.
    chunk_address: Addr<Bytes>,

    /// The receiver channel for chunks other peers sent.
    chunk_receiver: mpsc::Receiver<Bytes>,

    reader: PeerReader,
    writer: PeerWriter,
}

impl Peer {
    /// Creates a new instance from the two halves of a connection.
    pub fn new<R, W>(address: SocketAddr, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (chunk_address, chunk_receiver) = mailbox(MAILBOX_CAPACITY);
        Self {
            address,
            chunk_address,
            chunk_receiver,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Reads chunks from the client and hands them to the registry for broadcasting.
    ///
    /// Returns when the client disconnects or reading fails.
    async fn publish_chunks(address: SocketAddr, mut reader: PeerReader, registry: Addr<Chunk>) {
        let mut buffer = vec![0u8; RELAY_CHUNK_LEN];
        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => {
                    debug!(peer = %address, "Connection closed by peer");
                    return;
                }
                Ok(size) => {
                    trace!(peer = %address, size, "Read data from peer");
                    let chunk = Chunk {
                        origin: address,
                        data: Bytes::copy_from_slice(&buffer[..size]),
                    };
                    if !registry.send_message(chunk).await {
                        return;
                    }
                }
                Err(error) => {
                    warn!(peer = %address, %error, "Failed to read from peer");
                    return;
                }
            }
        }
    }

    /// Writes chunks coming from other peers to the client.
    ///
    /// A failed write is logged and the next chunk is still attempted.
    async fn forward_chunks(
        address: SocketAddr,
        writer: &mut PeerWriter,
        mut chunk_receiver: mpsc::Receiver<Bytes>,
    ) {
        while let Some(chunk) = chunk_receiver.recv().await {
            if let Err(error) = writer.write_all(&chunk).await {
                warn!(peer = %address, %error, "Failed to forward data to peer");
            }
        }
    }

    /// Runs the actor until the client disconnects or `cancel` fires.
    ///
    /// The connection is closed on return. Returns the peer's address so the
    /// registry knows which entry to drop.
    pub async fn run(self, registry: Addr<Chunk>, cancel: CancellationToken) -> SocketAddr {
        let Self {
            address,
            chunk_address,
            chunk_receiver,
            reader,
            mut writer,
        } = self;
        // Only other holders of the address may keep the mailbox open.
        drop(chunk_address);
        select! {
            _ = Self::publish_chunks(address, reader, registry) => {}
            _ = Self::forward_chunks(address, &mut writer, chunk_receiver) => {}
            _ = cancel.cancelled() => {}
        }
        if let Err(error) = writer.shutdown().await {
            debug!(peer = %address, %error, "Failed to close connection to peer");
        }
        address
    }
}

impl Actor<Bytes> for Peer {
    fn get_addr(&self) -> Addr<Bytes> {
        self.chunk_address.clone()
    }
}
