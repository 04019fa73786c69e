//! Broadcast relay: fan-out with eviction on delivery failure
//!
//! Every outbound envelope is stamped with a relay-local sequence id and
//! delivered to a snapshot of the current membership. A peer whose send
//! fails is evicted and announced as gone; one peer's failure never
//! aborts delivery to the rest.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::protocol::Envelope;
use crate::registry::{Peer, PeerId, Registry};
use crate::transport::SendHandle;

/// The broadcast relay engine
#[derive(Debug)]
pub struct Relay {
    registry: Registry,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The membership registry backing this relay
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a peer and announce the join to everyone else.
    ///
    /// Re-registering an existing identity updates the display name
    /// silently; only a genuinely new peer is announced.
    pub async fn register(&self, id: PeerId, name: String, handle: SendHandle) -> Peer {
        let (peer, newly) = self.registry.register(id, name, handle).await;
        if newly {
            info!(peer = %peer.id, name = %peer.name, "Peer joined");
            self.broadcast(Envelope::system(format!("{} joined", peer.name)), Some(peer.id))
                .await;
        } else {
            debug!(peer = %peer.id, name = %peer.name, "Peer re-registered");
        }
        peer
    }

    /// Remove a peer and announce the leave to everyone remaining.
    ///
    /// Idempotent: removing an unknown identity announces nothing.
    pub async fn remove(&self, id: PeerId) {
        if let Some(peer) = self.registry.remove(id).await {
            info!(peer = %peer.id, name = %peer.name, "Peer left");
            self.broadcast(Envelope::system(format!("{} left", peer.name)), Some(peer.id))
                .await;
        }
    }

    /// Deliver one envelope to every registered peer except `origin`.
    ///
    /// Assigns the next sequence id, snapshots the membership, and
    /// attempts one send per peer. An unreachable peer is evicted from
    /// the registry and its leave notice queued for broadcast after the
    /// current pass, each pass over a fresh snapshot. Fire-and-forget:
    /// at most one attempt per peer, no retry, no acknowledgment.
    ///
    /// Returns the sequence id assigned to `envelope`.
    pub async fn broadcast(&self, envelope: Envelope, origin: Option<PeerId>) -> u64 {
        let mut queue = VecDeque::new();
        queue.push_back((envelope, origin));
        let mut primary_id = 0;

        while let Some((envelope, origin)) = queue.pop_front() {
            let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
            if primary_id == 0 {
                primary_id = sequence;
            }
            let envelope = envelope.with_id(sequence);

            for peer in self.registry.snapshot().await {
                if origin == Some(peer.id) {
                    continue;
                }
                if let Err(e) = peer.handle.send(&envelope).await {
                    warn!(peer = %peer.id, error = %e, "Delivery failed, evicting peer");
                    if let Some(gone) = self.registry.remove(peer.id).await {
                        queue.push_back((
                            Envelope::system(format!("{} left", gone.name)),
                            Some(gone.id),
                        ));
                    }
                }
            }
        }

        primary_id
    }
}
