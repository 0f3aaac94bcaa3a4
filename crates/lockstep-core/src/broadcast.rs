//! Delivery of canonical entries from the coordinator to peers

use crate::types::CanonicalEntry;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

/// Delivers every finalized entry to all peers, the host's own participant included
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, entry: &CanonicalEntry);
}

/// In-process broadcaster: one unbounded channel per subscribed peer
#[derive(Default)]
pub struct LocalFanout {
    peers: RwLock<Vec<Sender<CanonicalEntry>>>,
}

impl LocalFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and get its inbound channel
    pub fn subscribe(&self) -> Receiver<CanonicalEntry> {
        let (tx, rx) = unbounded();
        self.peers.write().push(tx);
        rx
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

impl Broadcaster for LocalFanout {
    fn broadcast(&self, entry: &CanonicalEntry) {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|tx| tx.send(entry.clone()).is_ok());

        if peers.len() < before {
            tracing::warn!(
                "Dropped {} disconnected peers while broadcasting step {}",
                before - peers.len(),
                entry.step
            );
        }
        tracing::trace!("Broadcast step {} to {} peers", entry.step, peers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_gets_a_copy() {
        let fanout = LocalFanout::new();
        let a = fanout.subscribe();
        let b = fanout.subscribe();

        let entry = CanonicalEntry {
            step: 4,
            contributions: Vec::new(),
        };
        fanout.broadcast(&entry);

        assert_eq!(a.try_recv().unwrap(), entry);
        assert_eq!(b.try_recv().unwrap(), entry);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn test_disconnected_peers_are_dropped() {
        let fanout = LocalFanout::new();
        let _kept = fanout.subscribe();
        drop(fanout.subscribe());

        fanout.broadcast(&CanonicalEntry {
            step: 0,
            contributions: Vec::new(),
        });
        assert_eq!(fanout.peer_count(), 1);
    }
}
