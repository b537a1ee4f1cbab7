//! Transaction Pool & Confidence: the four-pool state machine that tracks
//! every transaction relevant to this wallet (spec.md §4.6). This is the
//! hardest/most load-bearing module in the crate.

use std::collections::{HashMap, HashSet};

use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::{debug, info, warn};

use crate::confidence::{ConfidenceType, Source, TxHash};
use crate::keychain_group::KeyChainGroup;
use crate::listeners::{Event, ListenerRegistry};
use crate::pool::{Pool, Pools};
use crate::risk::{analyze, RiskDeps};
use crate::tx::{Transaction, WalletTransaction};
use wallet_core::config::WalletConfig;

/// Which side of the current best chain a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    BestChain,
    SideChain,
}

/// Minimal block identity the pool needs: enough to record an appearance
/// and, during a re-org replay, which of our own transactions it confirms.
/// Full header/transaction parsing is out of scope (spec.md §1).
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub hash: [u8; 32],
    pub height: u64,
    /// Wallet-relevant transactions confirmed in this block, as (hash,
    /// offset within block) pairs. Only transactions this pool already
    /// tracks (pending or previously dead) can be replayed this way.
    pub transactions: Vec<(TxHash, u32)>,
}

const MAX_DROPPED: usize = 1000;

/// Owns the four pools and the bounded "dropped risky transaction" cache.
pub struct TransactionPool {
    pools: Pools,
    dropped: LruCache<TxHash, ()>,
    config: WalletConfig,
    pub listeners: ListenerRegistry,
}

impl TransactionPool {
    pub fn new(config: WalletConfig) -> Self {
        Self {
            pools: Pools::new(),
            dropped: LruCache::new(NonZeroUsize::new(MAX_DROPPED).expect("nonzero")),
            config,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Direct mutable access to the pools, used when restoring a serialised
    /// wallet: each tracked transaction is inserted into the pool it was
    /// saved under without re-running the state-machine transitions.
    pub fn pools_mut(&mut self) -> &mut Pools {
        &mut self.pools
    }

    fn is_ours(&self, group: &KeyChainGroup, script_pubkey: &[u8]) -> bool {
        match wallet_core::script::ScriptPubKey::classify(script_pubkey) {
            wallet_core::script::ScriptPubKey::PayToPubkeyHash(hash) => group.find_key_from_pubhash(&hash).is_some(),
            wallet_core::script::ScriptPubKey::PayToPubkey(pubkey) => group.find_key_from_pubkey(&pubkey).is_some(),
            wallet_core::script::ScriptPubKey::PayToScriptHash(_) => false,
            wallet_core::script::ScriptPubKey::Other(_) => false,
        }
    }

    fn tx_pays_us(&self, group: &KeyChainGroup, tx: &Transaction) -> bool {
        tx.outputs.iter().any(|out| self.is_ours(group, &out.script_pubkey))
    }

    /// Accepts a not-yet-confirmed transaction per spec.md §4.6
    /// `receive_pending`.
    pub fn receive_pending(&mut self, tx: Transaction, source: Source, group: &mut KeyChainGroup) -> crate::error::Result<()> {
        let hash = tx.hash();
        if self.pools.contains(&hash) || self.dropped.contains(&hash) {
            debug!(?hash, "receive_pending: already known, ignoring");
            return Ok(());
        }

        let deps = RiskDeps { config: &self.config };
        let verdict = analyze(&deps, &tx);
        if verdict.is_risky() && !self.config.accept_risky {
            warn!(?hash, ?verdict, "receive_pending: risky transaction dropped");
            self.dropped.put(hash, ());
            return Ok(());
        }

        // Mark our own previously-unspent outputs this tx consumes, and note
        // whether any of them actually were ours (drives `onCoinsSent`: a
        // payment that merely spends someone else's inputs must not look
        // like an outbound spend of our own coins).
        let mut spends_our_unspent = false;
        for input in &tx.inputs {
            if let Some(prior) = self.pools.unspent.get_mut(&input.previous_output.tx_hash) {
                prior.spent_outputs.insert(input.previous_output.index, hash);
                spends_our_unspent = true;
            }
        }

        // Double-spend detection against existing pending transactions.
        let mut conflicting: HashSet<TxHash> = HashSet::new();
        let incoming_outpoints: HashSet<_> = tx.inputs.iter().map(|i| i.previous_output.clone()).collect();
        for (other_hash, other_wtx) in self.pools.pending.iter() {
            if other_wtx.tx.inputs.iter().any(|i| incoming_outpoints.contains(&i.previous_output)) {
                conflicting.insert(*other_hash);
            }
        }

        let mut wtx = WalletTransaction::new_pending(tx, source);
        if !conflicting.is_empty() {
            wtx.confidence.mark_in_conflict();
            for other_hash in &conflicting {
                if let Some(other) = self.pools.pending.get_mut(other_hash) {
                    other.confidence.mark_in_conflict();
                }
            }
            info!(?hash, conflicts = conflicting.len(), "receive_pending: double spend detected, marked in-conflict");
        }

        let pays_us = self.tx_pays_us(group, &wtx.tx);
        for output in &wtx.tx.outputs {
            if let wallet_core::script::ScriptPubKey::PayToPubkeyHash(h) = output.classify() {
                let _ = group.mark_pubkey_hash_used(&h);
            }
        }

        self.pools.insert(Pool::Pending, wtx.clone());

        if pays_us {
            self.listeners.dispatch(Event::CoinsReceived { hash, tx: std::sync::Arc::new(wtx.tx.clone()) });
        }
        if spends_our_unspent {
            self.listeners.dispatch(Event::CoinsSent { hash, tx: std::sync::Arc::new(wtx.tx) });
        }
        Ok(())
    }

    /// Records a transaction's confirmation, per spec.md §4.6
    /// `notify_transaction_in_block`.
    pub fn notify_transaction_in_block(
        &mut self,
        hash: TxHash,
        block: &BlockInfo,
        kind: BlockKind,
        offset: u32,
        group: &mut KeyChainGroup,
    ) -> crate::error::Result<()> {
        if kind == BlockKind::SideChain {
            if let Some(wtx) = self.pools.get_mut(&hash) {
                wtx.tx.appearances.insert(block.hash, offset);
            }
            return Ok(());
        }

        let Some(mut wtx) = self.pools.remove(&hash) else {
            warn!(?hash, "notify_transaction_in_block: unknown transaction confirmed, ignoring");
            return Ok(());
        };
        wtx.tx.appearances.insert(block.hash, offset);
        wtx.confidence.confirm_at_height(block.height);

        // Resolve prior outputs this tx spends: move fully-consumed priors
        // to Spent, leave partially-consumed ones in Unspent.
        for input in &wtx.tx.inputs {
            let prior_hash = input.previous_output.tx_hash;
            if let Some(prior) = self.pools.unspent.get_mut(&prior_hash) {
                prior.spent_outputs.insert(input.previous_output.index, hash);
                if prior.fully_spent() {
                    self.pools.move_to(&prior_hash, Pool::Spent);
                }
            }
        }

        let pays_us = self.tx_pays_us(group, &wtx.tx);
        for output in &wtx.tx.outputs {
            if let wallet_core::script::ScriptPubKey::PayToPubkeyHash(h) = output.classify() {
                let _ = group.mark_pubkey_hash_used(&h);
            }
        }

        let destination_pool = if pays_us { Pool::Unspent } else { Pool::Spent };
        self.pools.insert(destination_pool, wtx.clone());

        // Any pending transaction double-spent by this one dies.
        let incoming_outpoints: HashSet<_> = wtx.tx.inputs.iter().map(|i| i.previous_output.clone()).collect();
        let losers: Vec<TxHash> = self
            .pools
            .pending
            .iter()
            .filter(|(other_hash, other)| **other_hash != hash && other.tx.inputs.iter().any(|i| incoming_outpoints.contains(&i.previous_output)))
            .map(|(h, _)| *h)
            .collect();
        for loser in losers {
            if let Some(mut loser_wtx) = self.pools.remove(&loser) {
                loser_wtx.confidence.mark_dead(hash);
                self.pools.insert(Pool::Dead, loser_wtx);
                self.listeners.dispatch(Event::ConfidenceChanged { hash: loser });
            }
        }

        self.listeners.dispatch(Event::ConfidenceChanged { hash });
        Ok(())
    }

    /// Increments the depth of every `Building` transaction.
    pub fn notify_new_best_block(&mut self) {
        for (_, wtx) in self.pools.pending.iter_mut().chain(self.pools.unspent.iter_mut()).chain(self.pools.spent.iter_mut()) {
            wtx.confidence.increment_depth();
        }
    }

    /// Rewinds `old_blocks` and replays `new_blocks`, per spec.md §4.6
    /// `reorganize`.
    pub fn reorganize(&mut self, old_blocks: &[BlockInfo], new_blocks: &[BlockInfo], group: &mut KeyChainGroup) -> crate::error::Result<()> {
        let old_hashes: HashSet<[u8; 32]> = old_blocks.iter().map(|b| b.hash).collect();

        let tracked_hashes: HashSet<TxHash> = self.pools.iter_all().map(|(h, _)| *h).collect();
        let rewound: Vec<TxHash> = self
            .pools
            .iter_all()
            .filter(|(_, wtx)| wtx.tx.appearances.keys().any(|h| old_hashes.contains(h)))
            .map(|(h, _)| *h)
            .collect();
        for hash in rewound {
            if let Some(wtx) = self.pools.get_mut(&hash) {
                wtx.tx.appearances.retain(|h, _| !old_hashes.contains(h));
                wtx.confidence.mark_pending();
                wtx.spent_outputs.retain(|_, spender| tracked_hashes.contains(spender) && *spender != hash);
            }
            self.pools.move_to(&hash, Pool::Pending);
        }

        for block in new_blocks {
            for (hash, offset) in &block.transactions {
                self.notify_transaction_in_block(*hash, block, BlockKind::BestChain, *offset, group)?;
            }
        }

        let dead_hashes: Vec<TxHash> = self.pools.dead.keys().copied().collect();
        for hash in dead_hashes {
            let overriding = match self.pools.dead.get(&hash).map(|w| w.confidence.confidence_type.clone()) {
                Some(ConfidenceType::Dead { overriding_tx }) => overriding_tx,
                _ => continue,
            };
            let still_confirmed = self.pools.unspent.contains_key(&overriding) || self.pools.spent.contains_key(&overriding);
            let double_spent_now = self.pools.unspent.values().chain(self.pools.spent.values()).any(|confirmed| {
                confirmed.tx.inputs.iter().any(|i| {
                    self.pools.dead.get(&hash).map(|w| w.tx.inputs.iter().any(|mine| mine.previous_output == i.previous_output)).unwrap_or(false)
                })
            });
            if !still_confirmed && !double_spent_now {
                if let Some(mut wtx) = self.pools.remove(&hash) {
                    wtx.confidence.mark_pending();
                    self.pools.insert(Pool::Pending, wtx);
                    info!(?hash, "reorganize: dead transaction promoted back to pending");
                }
            }
        }

        self.listeners.dispatch(Event::Reorganize);
        Ok(())
    }

    /// Checks the invariants in spec.md §4.6/§8: no duplicate hash across
    /// pools, Unspent/Spent output-availability agreement, and pool/
    /// confidence correspondence.
    pub fn check_consistency(&self) -> crate::error::Result<()> {
        let mut seen = HashMap::new();
        for (hash, _) in self.pools.iter_all() {
            if seen.insert(*hash, ()).is_some() {
                return Err(crate::error::WalletError::InconsistentWallet(format!("duplicate hash across pools: {hash:?}")));
            }
        }

        for (hash, wtx) in self.pools.unspent.iter() {
            if wtx.fully_spent() {
                return Err(crate::error::WalletError::InconsistentWallet(format!(
                    "tx {hash:?} in Unspent but every output already spent"
                )));
            }
        }
        for (hash, wtx) in self.pools.spent.iter() {
            if !wtx.fully_spent() && !wtx.tx.outputs.is_empty() {
                return Err(crate::error::WalletError::InconsistentWallet(format!(
                    "tx {hash:?} in Spent but has an unspent output"
                )));
            }
        }
        for (hash, wtx) in self.pools.dead.iter() {
            if !wtx.confidence.is_dead() {
                return Err(crate::error::WalletError::InconsistentWallet(format!(
                    "tx {hash:?} in Dead pool without Dead confidence"
                )));
            }
        }
        for (hash, wtx) in self.pools.unspent.iter().chain(self.pools.spent.iter()) {
            if !wtx.confidence.is_building() {
                return Err(crate::error::WalletError::InconsistentWallet(format!(
                    "tx {hash:?} confirmed-pool without Building confidence"
                )));
            }
        }
        Ok(())
    }

    pub fn dropped_contains(&mut self, hash: &TxHash) -> bool {
        self.dropped.contains(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::Purpose;
    use crate::tx::{OutPoint, TxIn, TxOut};
    use wallet_core::script::ScriptPubKey;

    fn make_group() -> KeyChainGroup {
        let mut group = KeyChainGroup::new();
        group.hd_chains.push(crate::keychain::KeyChain::from_seed(&[5u8; 32], 20, 5, 0).unwrap());
        group
    }

    fn payment_to(group: &mut KeyChainGroup, value: u64) -> Transaction {
        let key_id = group.hd_chains.last_mut().unwrap().get_key(Purpose::Receive).unwrap();
        let hash = group.hd_chains.last().unwrap().arena.get(key_id).pubkey_hash();
        Transaction::new(vec![], vec![TxOut { value, script_pubkey: ScriptPubKey::p2pkh_script(&hash) }], 0)
    }

    /// A payment whose input spends an outpoint this wallet never tracked
    /// (the payer's own coin) — the realistic shape of an inbound payment.
    fn payment_with_foreign_input(group: &mut KeyChainGroup, value: u64) -> Transaction {
        let key_id = group.hd_chains.last_mut().unwrap().get_key(Purpose::Receive).unwrap();
        let hash = group.hd_chains.last().unwrap().arena.get(key_id).pubkey_hash();
        Transaction::new(
            vec![TxIn { previous_output: OutPoint { tx_hash: [42u8; 32], index: 0 }, script_sig: vec![], sequence: 0xFFFF_FFFF }],
            vec![TxOut { value, script_pubkey: ScriptPubKey::p2pkh_script(&hash) }],
            0,
        )
    }

    #[test]
    fn genuine_payment_with_untracked_inputs_is_accepted_and_fires_only_coins_received() {
        let mut pool = TransactionPool::new(WalletConfig::default());
        let mut group = make_group();
        let tx = payment_with_foreign_input(&mut group, 250_000);
        let hash = tx.hash();

        let received = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let sent = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let r = received.clone();
        pool.listeners.subscribe(crate::listeners::EventKind::CoinsReceived, crate::listeners::Executor::SameThread, move |_| {
            r.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let s = sent.clone();
        pool.listeners.subscribe(crate::listeners::EventKind::CoinsSent, crate::listeners::Executor::SameThread, move |_| {
            s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        pool.receive_pending(tx, Source::NetworkBroadcast, &mut group).unwrap();
        assert!(pool.pools().pending.contains_key(&hash));
        assert_eq!(received.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(sent.load(std::sync::atomic::Ordering::SeqCst), 0, "spending an untracked input must not look like our own outbound spend");
    }

    #[test]
    fn dusty_tx_dropped_unless_accept_risky() {
        let mut group = make_group();
        let tx = payment_to(&mut group, 10);
        let hash = tx.hash();

        let mut pool = TransactionPool::new(WalletConfig::default());
        pool.receive_pending(tx.clone(), Source::NetworkBroadcast, &mut group).unwrap();
        assert!(!pool.pools().contains(&hash));
        assert!(pool.dropped_contains(&hash));

        let mut lenient_config = WalletConfig::default();
        lenient_config.accept_risky = true;
        let mut lenient_pool = TransactionPool::new(lenient_config);
        lenient_pool.receive_pending(tx, Source::NetworkBroadcast, &mut group).unwrap();
        assert!(lenient_pool.pools().pending.contains_key(&hash));
    }

    #[test]
    fn receive_pending_classifies_relevant_tx() {
        let mut pool = TransactionPool::new(WalletConfig::default());
        let mut group = make_group();
        let tx = payment_to(&mut group, 100_000);
        let hash = tx.hash();
        pool.receive_pending(tx, Source::NetworkBroadcast, &mut group).unwrap();
        assert!(pool.pools().pending.contains_key(&hash));
    }

    #[test]
    fn block_confirmation_moves_pending_to_unspent() {
        let mut pool = TransactionPool::new(WalletConfig::default());
        let mut group = make_group();
        let tx = payment_to(&mut group, 100_000);
        let hash = tx.hash();
        pool.receive_pending(tx, Source::NetworkBroadcast, &mut group).unwrap();

        let block = BlockInfo { hash: [1u8; 32], height: 100, transactions: vec![(hash, 0)] };
        pool.notify_transaction_in_block(hash, &block, BlockKind::BestChain, 0, &mut group).unwrap();
        assert!(pool.pools().unspent.contains_key(&hash));
        assert!(pool.pools().pending.is_empty());
        pool.check_consistency().unwrap();
    }

    #[test]
    fn double_spend_reorg_kills_loser() {
        let mut pool = TransactionPool::new(WalletConfig::default());
        let mut group = make_group();

        let funding = payment_to(&mut group, 1_000_000);
        let funding_hash = funding.hash();
        pool.receive_pending(funding.clone(), Source::NetworkBroadcast, &mut group).unwrap();
        let block0 = BlockInfo { hash: [0u8; 32], height: 1, transactions: vec![(funding_hash, 0)] };
        pool.notify_transaction_in_block(funding_hash, &block0, BlockKind::BestChain, 0, &mut group).unwrap();

        let spend_a = Transaction::new(
            vec![TxIn { previous_output: OutPoint { tx_hash: funding_hash, index: 0 }, script_sig: vec![], sequence: 0 }],
            vec![TxOut { value: 500_000, script_pubkey: ScriptPubKey::p2pkh_script(&[9u8; 20]) }],
            0,
        );
        let hash_a = spend_a.hash();
        let block_a = BlockInfo { hash: [2u8; 32], height: 2, transactions: vec![(hash_a, 0)] };
        pool.receive_pending(spend_a, Source::Myself, &mut group).unwrap();
        pool.notify_transaction_in_block(hash_a, &block_a, BlockKind::BestChain, 0, &mut group).unwrap();
        assert!(pool.pools().spent.contains_key(&funding_hash));

        let spend_b = Transaction::new(
            vec![TxIn { previous_output: OutPoint { tx_hash: funding_hash, index: 0 }, script_sig: vec![], sequence: 0 }],
            vec![TxOut { value: 400_000, script_pubkey: ScriptPubKey::p2pkh_script(&[8u8; 20]) }],
            0,
        );
        let hash_b = spend_b.hash();
        let block_b = BlockInfo { hash: [3u8; 32], height: 2, transactions: vec![(hash_b, 0)] };

        pool.reorganize(&[block_a.clone()], &[block_b.clone()], &mut group).unwrap();
        // spend_b wasn't tracked before the reorg, so it confirms as a fresh tx:
        pool.receive_pending(spend_b, Source::NetworkBroadcast, &mut group).unwrap();
        pool.notify_transaction_in_block(hash_b, &block_b, BlockKind::BestChain, 0, &mut group).unwrap();

        assert!(pool.pools().dead.contains_key(&hash_a));
        match pool.pools().dead.get(&hash_a).unwrap().confidence.confidence_type {
            ConfidenceType::Dead { overriding_tx } => assert_eq!(overriding_tx, hash_b),
            _ => panic!("expected dead"),
        }
    }
}
