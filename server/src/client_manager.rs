//! Connection tracking for the UDP transport
//!
//! This module maps socket addresses to the connection identities the host
//! session works with. It handles:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Liveness tracking from any received packet, heartbeats included
//! - Capacity limits
//!
//! The session never sees addresses; the network layer translates between
//! [`ConnectionId`] and [`SocketAddr`] through this manager.

use log::info;
use shared::ConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected endpoint
#[derive(Debug)]
pub struct Client {
    /// Identity assigned by the server, never reused
    pub id: ConnectionId,
    /// Network address for sending replication
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Marks the client as alive now
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing has been heard from this client for longer
    /// than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients
///
/// Enforces the server capacity and hands out monotonically increasing
/// connection identities starting from 1.
pub struct ClientManager {
    clients: HashMap<ConnectionId, Client>,
    next_client_id: u32,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns `None` if the server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = ConnectionId(self.next_client_id);
        self.next_client_id += 1;

        info!("{} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        Some(client_id)
    }

    /// Removes a client; returns false if it was already gone
    pub fn remove_client(&mut self, client_id: ConnectionId) -> bool {
        if let Some(client) = self.clients.remove(&client_id) {
            info!("{} disconnected from {}", client.id, client.addr);
            true
        } else {
            false
        }
    }

    /// Finds the connection bound to an address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.id)
    }

    pub fn addr_of(&self, client_id: ConnectionId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Refreshes liveness for the client at `addr` and returns its identity
    pub fn touch_addr(&mut self, addr: SocketAddr) -> Option<ConnectionId> {
        let client = self.clients.values_mut().find(|client| client.addr == addr)?;
        client.touch();
        Some(client.id)
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed identities so the session can clean up after them.
    pub fn check_timeouts(&mut self) -> Vec<ConnectionId> {
        let timeout = self.timeout;
        let timed_out: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(*client_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_client_timeout() {
        let mut client = Client::new(ConnectionId(1), test_addr());
        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));

        client.touch();
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3, Duration::from_secs(5));

        let client_id1 = manager.add_client(test_addr()).unwrap();
        let client_id2 = manager.add_client(test_addr2()).unwrap();

        assert_eq!(client_id1, ConnectionId(1));
        assert_eq!(client_id2, ConnectionId(2));
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.addr_of(client_id2), Some(test_addr2()));
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1, Duration::from_secs(5));

        assert!(manager.add_client(test_addr()).is_some());
        assert!(manager.add_client(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = ClientManager::new(2, Duration::from_secs(5));

        let first = manager.add_client(test_addr()).unwrap();
        assert!(manager.remove_client(first));
        assert!(!manager.remove_client(first));

        let second = manager.add_client(test_addr()).unwrap();
        assert_eq!(second, ConnectionId(2));
        assert!(manager.addr_of(first).is_none());
    }

    #[test]
    fn test_find_and_touch_by_addr() {
        let mut manager = ClientManager::new(2, Duration::from_secs(5));
        let client_id = manager.add_client(test_addr()).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id));
        assert_eq!(manager.find_client_by_addr(test_addr2()), None);
        assert_eq!(manager.touch_addr(test_addr()), Some(client_id));
        assert_eq!(manager.touch_addr(test_addr2()), None);
    }

    #[test]
    fn test_check_timeouts() {
        let mut manager = ClientManager::new(2, Duration::from_secs(5));
        let stale = manager.add_client(test_addr()).unwrap();
        let fresh = manager.add_client(test_addr2()).unwrap();

        if let Some(client) = manager.clients.get_mut(&stale) {
            client.last_seen = Instant::now() - Duration::from_secs(6);
        }

        assert_eq!(manager.check_timeouts(), vec![stale]);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.find_client_by_addr(test_addr2()), Some(fresh));
        assert!(manager.check_timeouts().is_empty());
    }
}
