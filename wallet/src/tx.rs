//! The on-wire Bitcoin transaction shape plus wallet-internal annotations
//! (spec.md §3 "Transaction" / "Wallet Transaction").

use std::collections::BTreeMap;

use wallet_core::script::ScriptPubKey;

use crate::confidence::{tx_hash, Confidence, Source, TxHash};

/// A reference to a previous transaction's output being spent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub tx_hash: TxHash,
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn classify(&self) -> ScriptPubKey {
        ScriptPubKey::classify(&self.script_pubkey)
    }
}

/// Why this wallet created or is tracking a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    UserPayment,
    KeyRotation,
    AssurancePledge,
    AssuranceClaim,
    RaiseFee,
    Unknown,
}

/// The raw transaction plus wallet bookkeeping.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,

    /// Block hash -> position within that block. A non-empty map with more
    /// than one entry means the tx has been seen on more than one chain
    /// (pre/post a re-org still in flight).
    pub appearances: BTreeMap<[u8; 32], u32>,
    pub update_time: u64,
    pub purpose: Purpose,
    pub exchange_rate: Option<f64>,
    pub memo: Option<String>,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>, update_time: u64) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
            appearances: BTreeMap::new(),
            update_time,
            purpose: Purpose::Unknown,
            exchange_rate: None,
            memo: None,
        }
    }

    /// Deterministic wallet-internal hash. In a full node this would be the
    /// double-SHA256 of the consensus-serialised transaction; here we hash
    /// a stable encoding of the fields this crate controls, which is
    /// sufficient for pool/confidence bookkeeping and respects spec.md's
    /// "double-SHA-256" convention (§4.1 `sha256d`).
    pub fn hash(&self) -> TxHash {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(&input.previous_output.tx_hash);
            buf.extend_from_slice(&input.previous_output.index.to_le_bytes());
            buf.extend_from_slice(&input.script_sig);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            buf.extend_from_slice(&output.script_pubkey);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        tx_hash(&buf)
    }

    /// Rough serialised size estimate used for fee calculation: actual
    /// field bytes plus per-input/per-output framing overhead.
    pub fn estimated_size(&self) -> usize {
        let mut size = 8 + 1 + 1; // version + input count + output count varint (approx)
        for input in &self.inputs {
            size += 36 + 4 + input.script_sig.len().max(107); // outpoint + sequence + sig script (unsigned inputs assumed P2PKH-sized)
        }
        for output in &self.outputs {
            size += 8 + output.script_pubkey.len();
        }
        size
    }
}

/// A [`Transaction`] paired with its current pool classification and
/// confidence.
#[derive(Debug, Clone)]
pub struct WalletTransaction {
    pub tx: Transaction,
    pub confidence: Confidence,
    /// Indices of this transaction's own outputs already consumed by a
    /// later wallet-tracked transaction; drives Unspent/Spent
    /// classification and the consistency audit in `txpool.rs`.
    pub spent_outputs: BTreeMap<u32, TxHash>,
}

impl WalletTransaction {
    pub fn new_pending(tx: Transaction, source: Source) -> Self {
        Self { confidence: Confidence::pending(source), tx, spent_outputs: BTreeMap::new() }
    }

    pub fn hash(&self) -> TxHash {
        self.tx.hash()
    }

    /// True once every output is accounted for by a later spend.
    pub fn fully_spent(&self) -> bool {
        !self.tx.outputs.is_empty() && self.spent_outputs.len() == self.tx.outputs.len()
    }
}
