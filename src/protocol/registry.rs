//! Client registry for connected game servers.
//!
//! The registry owns every connected client for the lifetime of its connection and is the only
//! place identities are handed out. It keeps three views of the same set:
//! - `id → client`: lookups for direct routing
//! - insertion order: deterministic broadcast fan-out in order of connection
//! - `peer address → id`: the transport side index
//!
//! The registry is owned by the hub task, so it needs no interior locking.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{RelayError, Result};

/// Outbound half of a client's transport: encoded frames queued for its writer task.
pub type Outbound = mpsc::UnboundedSender<Bytes>;

/// Identity of a client, or any integer a message addresses.
///
/// The registry only hands out positive values, so zero and negative ids never match a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(i64);

impl ClientId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ClientId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Self-description a game server sends with its identify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub group: String,
    pub ip: String,
    pub name: String,
    pub port: i64,
    /// Hidden servers are never announced to the rest of their group.
    pub hidden: bool,
}

/// Handshake state of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, no identify request accepted yet
    Unidentified,
    /// Identified; terminal for the life of the connection
    Identified(ServerInfo),
}

/// A connected game server.
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    peer: SocketAddr,
    state: ConnectionState,
    outbound: Outbound,
}

impl Client {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_identified(&self) -> bool {
        matches!(self.state, ConnectionState::Identified(_))
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        match &self.state {
            ConnectionState::Identified(info) => Some(info),
            ConnectionState::Unidentified => None,
        }
    }

    /// Group of an identified client.
    pub fn group(&self) -> Option<&str> {
        self.server_info().map(|info| info.group.as_str())
    }

    /// Queue an encoded frame for this client's writer task.
    ///
    /// Fails only when the writer has already stopped, i.e. the socket is gone.
    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| RelayError::TransportError(format!("writer for client {} closed", self.id)))
    }
}

/// Table of connected clients keyed by identity.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, Client>,
    order: Vec<ClientId>,
    by_peer: HashMap<SocketAddr, ClientId>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection under the smallest unused positive identity.
    pub fn register(&mut self, peer: SocketAddr, outbound: Outbound) -> &Client {
        let id = self.next_free_id();

        self.order.push(id);
        self.by_peer.insert(peer, id);
        self.clients.entry(id).or_insert(Client {
            id,
            peer,
            state: ConnectionState::Unidentified,
            outbound,
        })
    }

    /// Remove a client, releasing its identity for reuse.
    pub fn deregister(&mut self, id: ClientId) -> Option<Client> {
        let client = self.clients.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        if self.by_peer.get(&client.peer) == Some(&id) {
            self.by_peer.remove(&client.peer);
        }
        Some(client)
    }

    /// Move a client to `Identified`. The transition happens at most once.
    pub fn identify(&mut self, id: ClientId, info: ServerInfo) -> Result<&Client> {
        let client = self
            .clients
            .get_mut(&id)
            .ok_or(RelayError::UnknownClient(id))?;

        if client.is_identified() {
            return Err(RelayError::AlreadyIdentified(id));
        }

        client.state = ConnectionState::Identified(info);
        Ok(&*client)
    }

    pub fn find_by_id(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn find_by_peer(&self, peer: &SocketAddr) -> Option<&Client> {
        self.by_peer.get(peer).and_then(|id| self.clients.get(id))
    }

    /// Clients in order of connection.
    pub fn iter(&self) -> impl Iterator<Item = &Client> + '_ {
        self.order.iter().filter_map(|id| self.clients.get(id))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn next_free_id(&self) -> ClientId {
        (1..)
            .map(ClientId)
            .find(|id| !self.clients.contains_key(id))
            .unwrap_or(ClientId(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn outbound() -> Outbound {
        mpsc::unbounded_channel().0
    }

    fn info(group: &str) -> ServerInfo {
        ServerInfo {
            group: group.to_string(),
            ip: "10.0.0.1".to_string(),
            name: "srv".to_string(),
            port: 27015,
            hidden: false,
        }
    }

    #[test]
    fn identities_start_at_one_and_fill_gaps() {
        let mut registry = ClientRegistry::new();
        let ids: Vec<i64> = (0..3)
            .map(|i| registry.register(peer(1000 + i), outbound()).id().get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        registry.deregister(ClientId::from(2)).unwrap();
        assert_eq!(registry.register(peer(2000), outbound()).id().get(), 2);
        assert_eq!(registry.register(peer(2001), outbound()).id().get(), 4);
    }

    #[test]
    fn iteration_follows_connection_order() {
        let mut registry = ClientRegistry::new();
        for port in 1..=3 {
            registry.register(peer(port), outbound());
        }
        registry.deregister(ClientId::from(1));
        registry.register(peer(9), outbound());

        let order: Vec<i64> = registry.iter().map(|c| c.id().get()).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn lookups_by_id_and_peer() {
        let mut registry = ClientRegistry::new();
        let id = registry.register(peer(5), outbound()).id();

        assert_eq!(registry.find_by_peer(&peer(5)).unwrap().id(), id);
        assert_eq!(registry.find_by_id(id).unwrap().peer(), peer(5));
        assert!(registry.find_by_peer(&peer(6)).is_none());

        registry.deregister(id);
        assert!(registry.find_by_id(id).is_none());
        assert!(registry.find_by_peer(&peer(5)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn identify_is_one_way() {
        let mut registry = ClientRegistry::new();
        let id = registry.register(peer(5), outbound()).id();
        assert!(registry.find_by_id(id).unwrap().server_info().is_none());

        let client = registry.identify(id, info("g1")).unwrap();
        assert_eq!(client.group(), Some("g1"));

        assert!(matches!(
            registry.identify(id, info("g2")),
            Err(RelayError::AlreadyIdentified(_))
        ));
        assert_eq!(registry.find_by_id(id).unwrap().group(), Some("g1"));
    }

    #[test]
    fn send_frame_fails_once_writer_is_gone() {
        let mut registry = ClientRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(peer(5), tx).id();

        drop(rx);
        assert!(matches!(
            registry.find_by_id(id).unwrap().send_frame(Bytes::from_static(b"{}")),
            Err(RelayError::TransportError(_))
        ));
    }
}
