//! Module for [Registry] actor.
//!
//! It owns the list of connected peers and broadcasts every chunk a peer sends
//! to all the other peers. Being the only task that touches the list, it needs
//! no locking: registering, removing and broadcasting are serialised through
//! its mailboxes.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::{AbortHandle, Id, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::actors::{mailbox, Actor, Addr};

use super::{peer::Peer, MAILBOX_CAPACITY};

/// Raw bytes read from one peer, to be forwarded verbatim to the others.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub origin: SocketAddr,
    pub data: Bytes,
}

pub enum RegistryMessage {
    /// Registers a freshly accepted connection and starts serving it.
    AddPeer(Peer),
    /// Disconnects a peer and drops it from the broadcast set.
    RemovePeer(SocketAddr),
    /// Asks for the addresses of the registered peers, in registration order.
    ListPeers(oneshot::Sender<Vec<SocketAddr>>),
}

struct Entry {
    address: SocketAddr,
    mailbox: Addr<Bytes>,
    task: AbortHandle,
}

pub struct Registry {
    message_address: Addr<RegistryMessage>,
    message_receiver: mpsc::Receiver<RegistryMessage>,
    chunk_address: Addr<Chunk>,
    chunk_receiver: mpsc::Receiver<Chunk>,
    peers: Vec<Entry>,
    tasks: JoinSet<SocketAddr>,
}

impl Registry {
    pub fn new() -> Self {
        let (message_address, message_receiver) = mailbox(MAILBOX_CAPACITY);
        let (chunk_address, chunk_receiver) = mailbox(MAILBOX_CAPACITY);
        Self {
            message_address,
            message_receiver,
            chunk_address,
            chunk_receiver,
            peers: Vec::new(),
            tasks: JoinSet::new(),
        }
    }

    fn handle_message(&mut self, message: RegistryMessage, cancel: &CancellationToken) {
        match message {
            RegistryMessage::AddPeer(peer) => self.add_peer(peer, cancel),
            RegistryMessage::RemovePeer(address) => {
                if let Some(entry) = self.remove_peer(address) {
                    entry.task.abort();
                }
            }
            RegistryMessage::ListPeers(responder) => {
                let _ = responder.send(self.peers.iter().map(|entry| entry.address).collect());
            }
        }
    }

    fn add_peer(&mut self, peer: Peer, cancel: &CancellationToken) {
        let address = peer.address();
        if let Some(stale) = self.remove_peer(address) {
            stale.task.abort();
        }
        let mailbox = peer.get_addr();
        let task = self
            .tasks
            .spawn(peer.run(self.chunk_address.clone(), cancel.child_token()));
        self.peers.push(Entry {
            address,
            mailbox,
            task,
        });
        info!(peer = %address, peers = self.peers.len(), "Peer registered");
    }

    fn remove_peer(&mut self, address: SocketAddr) -> Option<Entry> {
        let index = self.peers.iter().position(|entry| entry.address == address)?;
        let entry = self.peers.remove(index);
        info!(peer = %address, peers = self.peers.len(), "Peer removed");
        Some(entry)
    }

    /// Drops the entry of a peer whose task has finished.
    ///
    /// The entry is kept when it belongs to a newer registration of the same
    /// address.
    fn remove_finished(&mut self, id: Id, address: SocketAddr) -> Option<Entry> {
        let current = self.peers.iter().find(|entry| entry.address == address)?;
        if current.task.id() != id {
            debug!(peer = %address, "Replaced peer task finished");
            return None;
        }
        self.remove_peer(address)
    }

    /// Forwards `chunk` to every peer except the one it came from.
    ///
    /// Never waits on a peer: a peer whose mailbox is full misses the chunk,
    /// so one client that stops reading cannot hold up the others. Chunks a
    /// peer does get arrive in the order they were read.
    fn broadcast(peers: &[Entry], chunk: Chunk) {
        for entry in peers.iter().filter(|entry| entry.address != chunk.origin) {
            trace!(from = %chunk.origin, to = %entry.address, size = chunk.data.len(), "Broadcasting");
            match entry.mailbox.try_send_message(chunk.data.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        peer = %entry.address,
                        size = chunk.data.len(),
                        "Peer is not keeping up, dropped chunk"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(peer = %entry.address, "Dropped chunk for a finished peer");
                }
            }
        }
    }

    /// Runs the registry until `cancel` fires, then waits for every peer to close.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            select! {
                _ = cancel.cancelled() => break,
                Some(message) = self.message_receiver.recv() => {
                    self.handle_message(message, &cancel);
                }
                Some(chunk) = self.chunk_receiver.recv() => {
                    Self::broadcast(&self.peers, chunk);
                }
                Some(finished) = self.tasks.join_next_with_id() => match finished {
                    Ok((id, address)) => {
                        self.remove_finished(id, address);
                    }
                    Err(error) if error.is_cancelled() => {}
                    Err(error) => warn!(%error, "Peer task failed"),
                },
            }
        }
        self.peers.clear();
        while self.tasks.join_next().await.is_some() {}
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor<RegistryMessage> for Registry {
    fn get_addr(&self) -> Addr<RegistryMessage> {
        self.message_address.clone()
    }
}

impl Actor<Chunk> for Registry {
    fn get_addr(&self) -> Addr<Chunk> {
        self.chunk_address.clone()
    }
}

impl Addr<RegistryMessage> {
    /// Registers `peer` with the registry behind this address.
    pub async fn add_peer(&self, peer: Peer) -> bool {
        self.send_message(RegistryMessage::AddPeer(peer)).await
    }

    /// Disconnects the peer at `address`, if registered.
    pub async fn remove_peer(&self, address: SocketAddr) -> bool {
        self.send_message(RegistryMessage::RemovePeer(address)).await
    }

    /// Returns the addresses of the registered peers, in registration order.
    ///
    /// An empty list is returned once the registry has stopped.
    pub async fn peers(&self) -> Vec<SocketAddr> {
        let (responder, response) = oneshot::channel();
        if !self.send_message(RegistryMessage::ListPeers(responder)).await {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }
}
