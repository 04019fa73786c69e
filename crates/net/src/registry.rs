//! Thread-safe membership registry
//!
//! The registry is the only state shared between session tasks. All
//! structural access goes through the lock; broadcast fan-out iterates
//! copy-on-read snapshots so the lock is never held across a send.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::RwLock;

use crate::transport::SendHandle;

/// Transport-level peer identity.
///
/// The remote address identifies a peer on both transports: the accepted
/// connection's address on a stream, the datagram source address otherwise.
pub type PeerId = SocketAddr;

/// One registered chat participant
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub handle: SendHandle,
}

/// Registered peers, keyed by transport identity
#[derive(Debug, Default)]
pub struct Registry {
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, or update an existing registration.
    ///
    /// Idempotent per identity: re-registering updates the display name
    /// and delivery handle in place. Returns the stored peer and whether
    /// it was newly inserted.
    pub async fn register(&self, id: PeerId, name: String, handle: SendHandle) -> (Peer, bool) {
        let mut peers = self.peers.write().await;
        let newly = !peers.contains_key(&id);
        let peer = Peer { id, name, handle };
        peers.insert(id, peer.clone());
        (peer, newly)
    }

    /// Look up a peer by identity
    pub async fn lookup(&self, id: PeerId) -> Option<Peer> {
        self.peers.read().await.get(&id).cloned()
    }

    /// Remove a peer. Idempotent: removing a non-member is a no-op.
    pub async fn remove(&self, id: PeerId) -> Option<Peer> {
        self.peers.write().await.remove(&id)
    }

    /// A point-in-time copy of all peers, ordered by identity.
    ///
    /// Safe to iterate while the registry mutates concurrently.
    pub async fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().await.values().cloned().collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    /// Drop every registration, returning the evicted peers.
    ///
    /// Dropping the peers releases their delivery handles, which ends
    /// each stream peer's writer task.
    pub async fn clear(&self) -> Vec<Peer> {
        self.peers.write().await.drain().map(|(_, p)| p).collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_handle() -> SendHandle {
        // Nothing in these tests delivers, so the receiver can go
        let (tx, _rx) = mpsc::channel(8);
        SendHandle::Stream(tx)
    }

    fn addr(port: u16) -> PeerId {
        ([127, 0, 0, 1], port).into()
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_identity() {
        let registry = Registry::new();

        let (_, newly) = registry
            .register(addr(1000), "alice".to_string(), test_handle())
            .await;
        assert!(newly);

        let (peer, newly) = registry
            .register(addr(1000), "alicia".to_string(), test_handle())
            .await;
        assert!(!newly);
        assert_eq!(peer.name, "alicia");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_no_duplicate_identities() {
        let registry = Registry::new();

        for round in 0..3 {
            for port in [1000, 1001, 1002] {
                registry
                    .register(addr(port), format!("peer-{}-{}", port, round), test_handle())
                    .await;
            }
        }

        assert_eq!(registry.len().await, 3);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].id, addr(1000));
        assert_eq!(snapshot[2].id, addr(1002));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = Registry::new();
        registry
            .register(addr(1000), "alice".to_string(), test_handle())
            .await;

        assert!(registry.remove(addr(1000)).await.is_some());
        assert!(registry.remove(addr(1000)).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_tracks_net_registrations() {
        let registry = Registry::new();

        registry
            .register(addr(1000), "alice".to_string(), test_handle())
            .await;
        registry
            .register(addr(1001), "bob".to_string(), test_handle())
            .await;
        registry.remove(addr(1000)).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "bob");
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = Registry::new();
        registry
            .register(addr(1000), "alice".to_string(), test_handle())
            .await;

        let snapshot = registry.snapshot().await;
        registry.remove(addr(1000)).await;

        // The copy is unaffected by the concurrent removal
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_returns_evicted_peers() {
        let registry = Registry::new();
        registry
            .register(addr(1000), "alice".to_string(), test_handle())
            .await;
        registry
            .register(addr(1001), "bob".to_string(), test_handle())
            .await;

        let evicted = registry.clear().await;
        assert_eq!(evicted.len(), 2);
        assert!(registry.is_empty().await);
    }
}
