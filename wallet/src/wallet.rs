//! Top-level `Wallet`: composes the key chain group, transaction pool and
//! event registry behind a two-lock hierarchy.
//!
//! Lock order is always `wallet_lock` before `key_chain_group_lock`. Every
//! method that needs both takes them in that order; nothing here ever
//! acquires `key_chain_group_lock` first and then reaches for `wallet_lock`,
//! which would deadlock against a caller going the other way.

use std::path::Path;

use parking_lot::RwLock;

use wallet_core::config::{Network, WalletConfig};

use crate::bloom::{collect_elements, FilterElement};
use crate::error::Result;
use crate::key::SingleKey;
use crate::keychain::{KeyChain, Purpose};
use crate::keychain_group::KeyChainGroup;
use crate::listeners::{Event, EventKind, Executor, ListenerRegistry};
use crate::pool::Pool;
use crate::send::{complete_and_commit, SendRequest};
use crate::serialization::{self, WalletSnapshot};
use crate::tx::Transaction;
use crate::txpool::{BlockInfo, BlockKind, TransactionPool};

/// Everything guarded by `wallet_lock`: the transaction pool and a few
/// loose wallet-level fields that don't belong to the key chain group.
struct WalletState {
    pool: TransactionPool,
    watched_scripts: Vec<Vec<u8>>,
    last_seen_block: Option<([u8; 32], u64, u64)>,
    key_rotation_time: Option<u64>,
}

/// A Bitcoin wallet: deterministic keys, tracked transactions, and the
/// send pipeline, wired together with the locking discipline the rest of
/// the engine assumes.
pub struct Wallet {
    config: WalletConfig,
    network: Network,
    creation_time: u64,
    wallet_lock: RwLock<WalletState>,
    key_chain_group_lock: RwLock<KeyChainGroup>,
    listeners: ListenerRegistry,
}

impl Wallet {
    /// Builds a fresh wallet from a 64-byte BIP39 seed.
    pub fn from_seed(config: WalletConfig, seed: &[u8], creation_time: u64) -> Result<Self> {
        let mut group = KeyChainGroup::new();
        group.hd_chains.push(KeyChain::from_seed(seed, config.lookahead_size, config.lookahead_threshold, creation_time)?);
        Ok(Self::new(config, group, creation_time))
    }

    /// Builds a wallet around an already-assembled key chain group (e.g.
    /// restored from disk).
    pub fn new(config: WalletConfig, group: KeyChainGroup, creation_time: u64) -> Self {
        let network = config.network;
        Self {
            network,
            creation_time,
            wallet_lock: RwLock::new(WalletState {
                pool: TransactionPool::new(config.clone()),
                watched_scripts: Vec::new(),
                last_seen_block: None,
                key_rotation_time: None,
            }),
            key_chain_group_lock: RwLock::new(group),
            listeners: ListenerRegistry::new(),
            config,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn subscribe<F>(&self, kind: EventKind, executor: Executor, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.listeners.subscribe(kind, executor, callback);
    }

    /// The current receive (or change) address, issuing a fresh key if the
    /// previously-current one has already been used.
    pub fn current_address(&self, purpose: Purpose) -> Result<String> {
        let mut group = self.key_chain_group_lock.write();
        group.current_address(self.network, purpose)
    }

    pub fn import_key(&self, key: SingleKey) -> Result<()> {
        let mut group = self.key_chain_group_lock.write();
        group.import_key(key)
    }

    pub fn watch_script(&self, script: Vec<u8>) {
        let mut state = self.wallet_lock.write();
        state.watched_scripts.push(script);
    }

    /// Elements a downstream Bloom filter must cover to see every output
    /// that could belong to this wallet, including unissued lookahead keys.
    pub fn bloom_elements(&self) -> Vec<FilterElement> {
        let state = self.wallet_lock.read();
        let group = self.key_chain_group_lock.read();
        collect_elements(&group, &state.watched_scripts)
    }

    /// Encrypts every key currently held with `passphrase`. Fails if the
    /// wallet is already encrypted or holds no keys yet.
    pub fn encrypt(&self, passphrase: &str) -> Result<()> {
        let mut group = self.key_chain_group_lock.write();
        group.encrypt(passphrase)
    }

    pub fn check_password(&self, passphrase: &str) -> bool {
        let group = self.key_chain_group_lock.read();
        group.check_password(passphrase)
    }

    pub fn is_encrypted(&self) -> bool {
        self.key_chain_group_lock.read().is_encrypted()
    }

    /// Derives the AES key `send` needs to sign with an encrypted wallet's
    /// keys, without ever handing the crypter itself to the caller.
    pub fn derive_aes_key(&self, passphrase: &str) -> Result<[u8; 32]> {
        let group = self.key_chain_group_lock.read();
        let crypter = group.crypter.as_ref().ok_or(crate::error::WalletError::Core(wallet_core::Error::NotEncrypted))?;
        Ok(*crypter.derive_key(passphrase)?)
    }

    /// Accepts a transaction this wallet has not yet confirmed, running it
    /// through risk analysis and double-spend detection.
    pub fn receive_pending(&self, tx: Transaction, source: crate::confidence::Source) -> Result<()> {
        let mut state = self.wallet_lock.write();
        let mut group = self.key_chain_group_lock.write();
        state.pool.receive_pending(tx, source, &mut group)
    }

    /// Records `hash`'s confirmation in `block`.
    pub fn notify_transaction_in_block(&self, hash: [u8; 32], block: &BlockInfo, kind: BlockKind, offset: u32) -> Result<()> {
        let mut state = self.wallet_lock.write();
        let mut group = self.key_chain_group_lock.write();
        state.pool.notify_transaction_in_block(hash, block, kind, offset, &mut group)?;
        state.last_seen_block = Some((block.hash, block.height, 0));
        Ok(())
    }

    pub fn notify_new_best_block(&self) {
        self.wallet_lock.write().pool.notify_new_best_block();
    }

    /// Rewinds `old_blocks` and replays `new_blocks` after a re-org.
    pub fn reorganize(&self, old_blocks: &[BlockInfo], new_blocks: &[BlockInfo]) -> Result<()> {
        let mut state = self.wallet_lock.write();
        let mut group = self.key_chain_group_lock.write();
        state.pool.reorganize(old_blocks, new_blocks, &mut group)
    }

    pub fn check_consistency(&self) -> Result<()> {
        self.wallet_lock.read().pool.check_consistency()
    }

    /// Builds, signs and commits `request`, returning the broadcastable
    /// transaction. Fails (without mutating any state) if coin selection,
    /// fee estimation or signing cannot be satisfied.
    pub fn send(&self, request: SendRequest) -> Result<Transaction> {
        let mut state = self.wallet_lock.write();
        let mut group = self.key_chain_group_lock.write();
        complete_and_commit(&self.config, self.network, &mut state.pool, &mut group, request)
    }

    pub fn confirmed_balance(&self) -> u64 {
        self.wallet_lock.read().pool.pools().unspent.values().map(|wtx| wtx.tx.outputs.iter().map(|o| o.value).sum::<u64>()).sum()
    }

    pub fn pending_balance(&self) -> u64 {
        self.wallet_lock.read().pool.pools().pending.values().map(|wtx| wtx.tx.outputs.iter().map(|o| o.value).sum::<u64>()).sum()
    }

    /// Snapshots everything needed to reconstruct this wallet and writes it
    /// atomically to `path`.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let state = self.wallet_lock.read();
        let group = self.key_chain_group_lock.read();
        let snapshot = WalletSnapshot {
            network: self.network,
            creation_time: self.creation_time,
            group: group.clone(),
            pool: clone_pool(&state.pool, &self.config),
            watched_scripts: state.watched_scripts.clone(),
            last_seen_block: state.last_seen_block,
            key_rotation_time: state.key_rotation_time,
        };
        serialization::save_to_file(&snapshot, path)
    }

    /// Reconstructs a wallet previously written by [`Self::save_to_file`].
    pub fn load_from_file(path: &Path, config: WalletConfig) -> Result<Self> {
        let snapshot = serialization::load_from_file(path, config.clone())?;
        let wallet = Self {
            network: snapshot.network,
            creation_time: snapshot.creation_time,
            wallet_lock: RwLock::new(WalletState {
                pool: snapshot.pool,
                watched_scripts: snapshot.watched_scripts,
                last_seen_block: snapshot.last_seen_block,
                key_rotation_time: snapshot.key_rotation_time,
            }),
            key_chain_group_lock: RwLock::new(snapshot.group),
            listeners: ListenerRegistry::new(),
            config,
        };
        Ok(wallet)
    }
}

/// `TransactionPool` keeps its config as a private field with no accessor,
/// so a save pass rebuilds an equivalent empty pool from the wallet's own
/// config and refills it from the live pools rather than cloning the type
/// directly.
fn clone_pool(pool: &TransactionPool, config: &WalletConfig) -> TransactionPool {
    let mut fresh = TransactionPool::new(config.clone());
    for (pool_tag, wtx) in [
        (Pool::Pending, &pool.pools().pending),
        (Pool::Unspent, &pool.pools().unspent),
        (Pool::Spent, &pool.pools().spent),
        (Pool::Dead, &pool.pools().dead),
    ]
    .into_iter()
    .flat_map(|(tag, map)| map.values().map(move |wtx| (tag, wtx)))
    {
        fresh.pools_mut().insert(pool_tag, wtx.clone());
    }
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::Source;
    use crate::tx::TxOut;
    use wallet_core::hd::mnemonic::Mnemonic;
    use wallet_core::script::ScriptPubKey;

    fn test_wallet() -> Wallet {
        let mnemonic = Mnemonic::from_entropy(&[1u8; 16]).unwrap();
        let seed = mnemonic.to_seed("");
        Wallet::from_seed(WalletConfig::default(), &seed, 0).unwrap()
    }

    #[test]
    fn current_address_is_stable_until_used() {
        let wallet = test_wallet();
        let first = wallet.current_address(Purpose::Receive).unwrap();
        let second = wallet.current_address(Purpose::Receive).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn receiving_a_payment_updates_pending_balance() {
        let wallet = test_wallet();
        let address = wallet.current_address(Purpose::Receive).unwrap();
        let (_, hash) = wallet_core::ecc::base58check_decode(&address).unwrap();
        let tx = Transaction::new(vec![], vec![TxOut { value: 250_000, script_pubkey: ScriptPubKey::p2pkh_script(&hash) }], 0);
        wallet.receive_pending(tx, Source::NetworkBroadcast).unwrap();
        assert_eq!(wallet.pending_balance(), 250_000);
        assert_eq!(wallet.confirmed_balance(), 0);
    }

    #[test]
    fn save_and_load_roundtrip_preserves_balance() {
        let wallet = test_wallet();
        let address = wallet.current_address(Purpose::Receive).unwrap();
        let (_, hash) = wallet_core::ecc::base58check_decode(&address).unwrap();
        let tx = Transaction::new(vec![], vec![TxOut { value: 75_000, script_pubkey: ScriptPubKey::p2pkh_script(&hash) }], 0);
        wallet.receive_pending(tx, Source::Myself).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        wallet.save_to_file(&path).unwrap();

        let restored = Wallet::load_from_file(&path, WalletConfig::default()).unwrap();
        assert_eq!(restored.pending_balance(), 75_000);
    }
}
