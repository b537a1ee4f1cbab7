//! The four disjoint transaction pools (spec.md §3).
//!
//! Every tracked transaction lives in exactly one of these at a time; the
//! union of the four equals the full tracked set. [`crate::txpool::TransactionPool`]
//! is the only code allowed to move a hash between them.

use std::collections::HashMap;

use crate::confidence::TxHash;
use crate::tx::WalletTransaction;

/// Which of the four pools a transaction currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    Pending,
    Unspent,
    Spent,
    Dead,
}

/// A flat map per pool. Kept as four separate maps (rather than one map
/// plus a `Pool` tag) so "is this hash in exactly one pool" is checkable by
/// construction during the consistency audit in `txpool.rs`.
#[derive(Default)]
pub struct Pools {
    pub pending: HashMap<TxHash, WalletTransaction>,
    pub unspent: HashMap<TxHash, WalletTransaction>,
    pub spent: HashMap<TxHash, WalletTransaction>,
    pub dead: HashMap<TxHash, WalletTransaction>,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_mut(&mut self, pool: Pool) -> &mut HashMap<TxHash, WalletTransaction> {
        match pool {
            Pool::Pending => &mut self.pending,
            Pool::Unspent => &mut self.unspent,
            Pool::Spent => &mut self.spent,
            Pool::Dead => &mut self.dead,
        }
    }

    fn map(&self, pool: Pool) -> &HashMap<TxHash, WalletTransaction> {
        match pool {
            Pool::Pending => &self.pending,
            Pool::Unspent => &self.unspent,
            Pool::Spent => &self.spent,
            Pool::Dead => &self.dead,
        }
    }

    /// Returns which pool currently holds `hash`, if any.
    pub fn locate(&self, hash: &TxHash) -> Option<Pool> {
        for pool in [Pool::Pending, Pool::Unspent, Pool::Spent, Pool::Dead] {
            if self.map(pool).contains_key(hash) {
                return Some(pool);
            }
        }
        None
    }

    pub fn get(&self, hash: &TxHash) -> Option<&WalletTransaction> {
        self.locate(hash).map(|pool| &self.map(pool)[hash])
    }

    pub fn get_mut(&mut self, hash: &TxHash) -> Option<&mut WalletTransaction> {
        match self.locate(hash) {
            Some(pool) => self.map_mut(pool).get_mut(hash),
            None => None,
        }
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.locate(hash).is_some()
    }

    /// Inserts `wtx` into `pool`. If the hash already exists elsewhere, it
    /// is removed from its old pool first — a transaction is never in two
    /// pools at once.
    pub fn insert(&mut self, pool: Pool, wtx: WalletTransaction) {
        let hash = wtx.hash();
        self.remove(&hash);
        self.map_mut(pool).insert(hash, wtx);
    }

    /// Removes `hash` from whichever pool holds it, returning the removed
    /// transaction.
    pub fn remove(&mut self, hash: &TxHash) -> Option<WalletTransaction> {
        for pool in [Pool::Pending, Pool::Unspent, Pool::Spent, Pool::Dead] {
            if let Some(wtx) = self.map_mut(pool).remove(hash) {
                return Some(wtx);
            }
        }
        None
    }

    /// Moves `hash` into `pool` in place, leaving it untouched if it is
    /// already there. No-op if the hash is not currently tracked.
    pub fn move_to(&mut self, hash: &TxHash, pool: Pool) {
        if self.locate(hash) == Some(pool) {
            return;
        }
        if let Some(wtx) = self.remove(hash) {
            self.map_mut(pool).insert(*hash, wtx);
        }
    }

    pub fn iter_all(&self) -> impl Iterator<Item = (&TxHash, &WalletTransaction)> {
        self.pending.iter().chain(self.unspent.iter()).chain(self.spent.iter()).chain(self.dead.iter())
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.unspent.len() + self.spent.len() + self.dead.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::Source;
    use crate::tx::Transaction;

    fn sample_wtx(nonce: u8) -> WalletTransaction {
        let tx = Transaction::new(vec![], vec![], nonce as u64);
        WalletTransaction::new_pending(tx, Source::Myself)
    }

    #[test]
    fn insert_moves_between_pools_without_duplication() {
        let mut pools = Pools::new();
        let wtx = sample_wtx(1);
        let hash = wtx.hash();
        pools.insert(Pool::Pending, wtx.clone());
        assert_eq!(pools.locate(&hash), Some(Pool::Pending));
        pools.insert(Pool::Unspent, wtx);
        assert_eq!(pools.locate(&hash), Some(Pool::Unspent));
        assert_eq!(pools.len(), 1);
    }

    #[test]
    fn move_to_is_noop_when_already_there() {
        let mut pools = Pools::new();
        let wtx = sample_wtx(2);
        let hash = wtx.hash();
        pools.insert(Pool::Unspent, wtx);
        pools.move_to(&hash, Pool::Unspent);
        assert_eq!(pools.len(), 1);
    }
}
