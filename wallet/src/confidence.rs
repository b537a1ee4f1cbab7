//! Per-transaction confidence: this wallet's belief about how solidly a
//! transaction has entered the best chain.

use std::collections::BTreeSet;

use wallet_core::ecc::sha256d;

/// Hash of a transaction: double-SHA256 of its serialised form.
pub type TxHash = [u8; 32];

/// Source of the first sighting of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Created and broadcast by this wallet.
    Myself,
    /// Heard from a peer.
    NetworkBroadcast,
    Unknown,
}

/// This wallet's belief about a transaction's position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfidenceType {
    Unknown,
    /// Confirmed, `appeared_at_height` blocks deep as of the last update.
    Building { appeared_at_height: u64, depth: u32 },
    /// Broadcast but not yet confirmed.
    Pending,
    /// Overridden by a confirmed double spend.
    Dead { overriding_tx: TxHash },
    /// Conflicts with another pending transaction; neither has confirmed.
    InConflict,
}

/// The full confidence record for one tracked transaction.
#[derive(Debug, Clone)]
pub struct Confidence {
    pub confidence_type: ConfidenceType,
    /// Peers that have announced this transaction to us.
    pub broadcast_by: BTreeSet<Vec<u8>>,
    pub source: Source,
}

impl Confidence {
    pub fn new(source: Source) -> Self {
        Self { confidence_type: ConfidenceType::Unknown, broadcast_by: BTreeSet::new(), source }
    }

    pub fn pending(source: Source) -> Self {
        Self { confidence_type: ConfidenceType::Pending, broadcast_by: BTreeSet::new(), source }
    }

    pub fn mark_broadcast_by(&mut self, peer: Vec<u8>) {
        self.broadcast_by.insert(peer);
    }

    /// Transitions to `Building` at `height`, depth 1 (a freshly confirmed
    /// transaction's first sighting in a block).
    pub fn confirm_at_height(&mut self, height: u64) {
        self.confidence_type = ConfidenceType::Building { appeared_at_height: height, depth: 1 };
    }

    /// Increments depth for a `Building` confidence on a new best block.
    /// No-op for any other confidence type.
    pub fn increment_depth(&mut self) {
        if let ConfidenceType::Building { appeared_at_height, depth } = self.confidence_type {
            self.confidence_type = ConfidenceType::Building { appeared_at_height, depth: depth + 1 };
        }
    }

    pub fn mark_dead(&mut self, overriding_tx: TxHash) {
        self.confidence_type = ConfidenceType::Dead { overriding_tx };
    }

    pub fn mark_in_conflict(&mut self) {
        self.confidence_type = ConfidenceType::InConflict;
    }

    pub fn mark_pending(&mut self) {
        self.confidence_type = ConfidenceType::Pending;
    }

    pub fn is_building(&self) -> bool {
        matches!(self.confidence_type, ConfidenceType::Building { .. })
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.confidence_type, ConfidenceType::Dead { .. })
    }

    pub fn depth(&self) -> u32 {
        match self.confidence_type {
            ConfidenceType::Building { depth, .. } => depth,
            _ => 0,
        }
    }

    pub fn appeared_at_height(&self) -> Option<u64> {
        match self.confidence_type {
            ConfidenceType::Building { appeared_at_height, .. } => Some(appeared_at_height),
            _ => None,
        }
    }
}

/// Computes the wallet-internal transaction hash used as every pool/map key.
pub fn tx_hash(serialized: &[u8]) -> TxHash {
    sha256d(serialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_increments_only_while_building() {
        let mut c = Confidence::pending(Source::Myself);
        c.increment_depth();
        assert_eq!(c.depth(), 0);
        c.confirm_at_height(100);
        c.increment_depth();
        assert_eq!(c.depth(), 2);
    }

    #[test]
    fn dead_records_overriding_tx() {
        let mut c = Confidence::pending(Source::NetworkBroadcast);
        let over = [9u8; 32];
        c.mark_dead(over);
        assert!(c.is_dead());
        match c.confidence_type {
            ConfidenceType::Dead { overriding_tx } => assert_eq!(overriding_tx, over),
            _ => panic!("expected dead"),
        }
    }
}
