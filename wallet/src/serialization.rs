//! On-disk wallet persistence: a TLV-framed snapshot of the key chain group,
//! transaction pool and a few wallet-level fields, written atomically.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use wallet_core::config::{Network, WalletConfig};
use wallet_core::crypter::{KeyCrypter, ScryptCost};
use wallet_core::hd::extended_key::ExtendedKey;
use wallet_core::serialize::{TlvReader, TlvWriter};
use wallet_core::Error as CoreError;

use crate::confidence::{Confidence, ConfidenceType, Source, TxHash};
use crate::key::SingleKey;
use crate::keychain::{KeyChain, Purpose};
use crate::keychain_group::KeyChainGroup;
use crate::pool::Pool;
use crate::tx::{OutPoint, Transaction, TxIn, TxOut, WalletTransaction};
use crate::txpool::TransactionPool;
use wallet_core::ecc::KeyPair;

use crate::error::{Result, WalletError};

const FORMAT_VERSION: u32 = 1;

// Top-level tags.
const T_VERSION: u16 = 1;
const T_NETWORK: u16 = 2;
const T_CREATION_TIME: u16 = 3;
const T_BASIC_KEY: u16 = 4;
const T_HD_CHAIN: u16 = 5;
const T_TRANSACTION: u16 = 6;
const T_WATCHED_SCRIPT: u16 = 7;
const T_LAST_BLOCK_HASH: u16 = 8;
const T_LAST_BLOCK_HEIGHT: u16 = 9;
const T_LAST_BLOCK_TIME: u16 = 10;
const T_CRYPTER_COST: u16 = 11;
const T_KEY_ROTATION_TIME: u16 = 12;

// Basic-key sub-tags.
const BK_PUBLIC_KEY: u16 = 1;
const BK_COMPRESSED: u16 = 2;
const BK_CREATION_TIME: u16 = 3;
const BK_SECRET: u16 = 4;
const BK_ENCRYPTED_IV: u16 = 5;
const BK_ENCRYPTED_CIPHERTEXT: u16 = 6;
const BK_CRYPTER_ID: u16 = 7;

// HD-chain sub-tags.
const HC_ROOT_KEY_STRING: u16 = 1;
const HC_IS_PRIVATE: u16 = 2;
const HC_LOOKAHEAD_SIZE: u16 = 3;
const HC_LOOKAHEAD_THRESHOLD: u16 = 4;
const HC_ISSUED_EXTERNAL: u16 = 5;
const HC_ISSUED_INTERNAL: u16 = 6;
const HC_CREATION_TIME: u16 = 7;
const HC_CRYPTER_ID: u16 = 8;

// Transaction sub-tags.
const TX_POOL: u16 = 1;
const TX_VERSION: u16 = 2;
const TX_INPUT: u16 = 3;
const TX_OUTPUT: u16 = 4;
const TX_LOCK_TIME: u16 = 5;
const TX_APPEARANCE: u16 = 6;
const TX_UPDATE_TIME: u16 = 7;
const TX_PURPOSE: u16 = 8;
const TX_MEMO: u16 = 9;
const TX_CONFIDENCE: u16 = 10;
const TX_SPENT_OUTPUT: u16 = 11;
const TX_EXCHANGE_RATE: u16 = 12;

// TxIn sub-tags.
const IN_PREV_HASH: u16 = 1;
const IN_PREV_INDEX: u16 = 2;
const IN_SCRIPT_SIG: u16 = 3;
const IN_SEQUENCE: u16 = 4;

// TxOut sub-tags.
const OUT_VALUE: u16 = 1;
const OUT_SCRIPT_PUBKEY: u16 = 2;

// Appearance sub-tags.
const APP_BLOCK_HASH: u16 = 1;
const APP_OFFSET: u16 = 2;

// Spent-output sub-tags.
const SPENT_INDEX: u16 = 1;
const SPENT_SPENDER_HASH: u16 = 2;

// Confidence sub-tags.
const CONF_KIND: u16 = 1;
const CONF_APPEARED_AT_HEIGHT: u16 = 2;
const CONF_DEPTH: u16 = 3;
const CONF_OVERRIDING_TX: u16 = 4;
const CONF_SOURCE: u16 = 5;

fn network_to_byte(network: Network) -> u8 {
    match network {
        Network::Mainnet => 0,
        Network::Testnet => 1,
    }
}

fn byte_to_network(b: u8) -> Result<Network> {
    match b {
        0 => Ok(Network::Mainnet),
        1 => Ok(Network::Testnet),
        _ => Err(WalletError::Core(CoreError::Other(format!("unknown network byte {b}")))),
    }
}

fn field_u64(fields: &[wallet_core::serialize::Field], tag: u16) -> Option<u64> {
    fields.iter().find(|f| f.tag == tag).map(|f| u64::from_le_bytes(f.bytes[..8].try_into().expect("8 bytes")))
}

fn field_u32(fields: &[wallet_core::serialize::Field], tag: u16) -> Option<u32> {
    fields.iter().find(|f| f.tag == tag).map(|f| u32::from_le_bytes(f.bytes[..4].try_into().expect("4 bytes")))
}

fn field_bytes<'a>(fields: &'a [wallet_core::serialize::Field], tag: u16) -> Option<&'a [u8]> {
    fields.iter().find(|f| f.tag == tag).map(|f| f.bytes.as_slice())
}

fn serialize_single_key(key: &SingleKey) -> Vec<u8> {
    let mut w = TlvWriter::new();
    w.write_field(BK_PUBLIC_KEY, true, &key.public_key_bytes());
    w.write_field(BK_COMPRESSED, true, &[key.keypair.compressed as u8]);
    w.write_u64(BK_CREATION_TIME, false, key.creation_time);
    if let Some(secret) = key.keypair.secret {
        w.write_field(BK_SECRET, true, &secret.secret_bytes());
    }
    if let Some(enc) = &key.encrypted {
        w.write_field(BK_ENCRYPTED_IV, true, &enc.iv);
        w.write_field(BK_ENCRYPTED_CIPHERTEXT, true, &enc.ciphertext);
    }
    if let Some(id) = key.crypter_id {
        w.write_u64(BK_CRYPTER_ID, false, id);
    }
    w.into_bytes()
}

fn deserialize_single_key(bytes: &[u8], require_mandatory: bool) -> Result<SingleKey> {
    let mut reader = TlvReader::new(bytes);
    let fields = reader.read_all(
        &[BK_PUBLIC_KEY, BK_COMPRESSED, BK_CREATION_TIME, BK_SECRET, BK_ENCRYPTED_IV, BK_ENCRYPTED_CIPHERTEXT, BK_CRYPTER_ID],
        require_mandatory,
    )?;

    let pubkey_bytes = field_bytes(&fields, BK_PUBLIC_KEY).ok_or_else(|| WalletError::Core(CoreError::Other("missing public key".into())))?;
    let compressed = field_bytes(&fields, BK_COMPRESSED).map(|b| b[0] != 0).unwrap_or(true);
    let creation_time = field_u64(&fields, BK_CREATION_TIME).unwrap_or(0);

    let keypair = if let Some(secret_bytes) = field_bytes(&fields, BK_SECRET) {
        let secret = secp256k1::SecretKey::from_slice(secret_bytes)
            .map_err(|e| WalletError::Core(CoreError::InvalidExtendedKey(e.to_string())))?;
        KeyPair::from_secret(secret, compressed)
    } else {
        let public = secp256k1::PublicKey::from_slice(pubkey_bytes)
            .map_err(|e| WalletError::Core(CoreError::InvalidExtendedKey(e.to_string())))?;
        KeyPair::watching(public, compressed)
    };

    let encrypted = match (field_bytes(&fields, BK_ENCRYPTED_IV), field_bytes(&fields, BK_ENCRYPTED_CIPHERTEXT)) {
        (Some(iv), Some(ciphertext)) => {
            let mut iv_arr = [0u8; 16];
            iv_arr.copy_from_slice(iv);
            Some(wallet_core::crypter::EncryptedData { iv: iv_arr, ciphertext: ciphertext.to_vec() })
        }
        _ => None,
    };
    let crypter_id = field_u64(&fields, BK_CRYPTER_ID);

    Ok(SingleKey { keypair, creation_time, encrypted, crypter_id })
}

fn serialize_hd_chain(chain: &KeyChain, network: Network) -> Result<Vec<u8>> {
    let root = chain.root_extended();
    let is_private = root.secret.is_some();
    let root_string = if is_private { root.to_xprv_string(network)? } else { root.to_xpub_string(network) };

    let (lookahead_size, lookahead_threshold) = chain.lookahead_params();
    let mut w = TlvWriter::new();
    w.write_str(HC_ROOT_KEY_STRING, true, &root_string);
    w.write_field(HC_IS_PRIVATE, true, &[is_private as u8]);
    w.write_u32(HC_LOOKAHEAD_SIZE, true, lookahead_size);
    w.write_u32(HC_LOOKAHEAD_THRESHOLD, true, lookahead_threshold);
    w.write_u32(HC_ISSUED_EXTERNAL, true, chain.issued(Purpose::Receive));
    w.write_u32(HC_ISSUED_INTERNAL, true, chain.issued(Purpose::Change));
    w.write_u64(HC_CREATION_TIME, false, chain.creation_time());
    if let Some(id) = chain.crypter_id {
        w.write_u64(HC_CRYPTER_ID, false, id);
    }
    Ok(w.into_bytes())
}

fn deserialize_hd_chain(bytes: &[u8], require_mandatory: bool) -> Result<KeyChain> {
    let mut reader = TlvReader::new(bytes);
    let fields = reader.read_all(
        &[
            HC_ROOT_KEY_STRING,
            HC_IS_PRIVATE,
            HC_LOOKAHEAD_SIZE,
            HC_LOOKAHEAD_THRESHOLD,
            HC_ISSUED_EXTERNAL,
            HC_ISSUED_INTERNAL,
            HC_CREATION_TIME,
            HC_CRYPTER_ID,
        ],
        require_mandatory,
    )?;

    let root_string = field_bytes(&fields, HC_ROOT_KEY_STRING)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| WalletError::Core(CoreError::Other("missing hd chain root key".into())))?;
    let is_private = field_bytes(&fields, HC_IS_PRIVATE).map(|b| b[0] != 0).unwrap_or(false);
    let lookahead_size = field_u32(&fields, HC_LOOKAHEAD_SIZE).unwrap_or(100);
    let lookahead_threshold = field_u32(&fields, HC_LOOKAHEAD_THRESHOLD).unwrap_or(50);
    let issued_external = field_u32(&fields, HC_ISSUED_EXTERNAL).unwrap_or(0);
    let issued_internal = field_u32(&fields, HC_ISSUED_INTERNAL).unwrap_or(0);
    let creation_time = field_u64(&fields, HC_CREATION_TIME).unwrap_or(0);

    let root = if is_private {
        ExtendedKey::from_xprv_string(&root_string)?
    } else {
        ExtendedKey::from_xpub_string(&root_string)?
    };

    let mut chain = KeyChain::from_master(&root, lookahead_size, lookahead_threshold, creation_time)?;
    chain.restore_issued(Purpose::Receive, issued_external)?;
    chain.restore_issued(Purpose::Change, issued_internal)?;
    chain.crypter_id = field_u64(&fields, HC_CRYPTER_ID);
    Ok(chain)
}

fn serialize_confidence(confidence: &Confidence) -> Vec<u8> {
    let mut w = TlvWriter::new();
    let kind: u8 = match confidence.confidence_type {
        ConfidenceType::Unknown => 0,
        ConfidenceType::Building { .. } => 1,
        ConfidenceType::Pending => 2,
        ConfidenceType::Dead { .. } => 3,
        ConfidenceType::InConflict => 4,
    };
    w.write_field(CONF_KIND, true, &[kind]);
    if let ConfidenceType::Building { appeared_at_height, depth } = confidence.confidence_type {
        w.write_u64(CONF_APPEARED_AT_HEIGHT, true, appeared_at_height);
        w.write_u32(CONF_DEPTH, true, depth);
    }
    if let ConfidenceType::Dead { overriding_tx } = confidence.confidence_type {
        w.write_field(CONF_OVERRIDING_TX, true, &overriding_tx);
    }
    let source: u8 = match confidence.source {
        Source::Myself => 0,
        Source::NetworkBroadcast => 1,
        Source::Unknown => 2,
    };
    w.write_field(CONF_SOURCE, false, &[source]);
    w.into_bytes()
}

fn deserialize_confidence(bytes: &[u8], require_mandatory: bool) -> Result<Confidence> {
    let mut reader = TlvReader::new(bytes);
    let fields = reader.read_all(&[CONF_KIND, CONF_APPEARED_AT_HEIGHT, CONF_DEPTH, CONF_OVERRIDING_TX, CONF_SOURCE], require_mandatory)?;

    let kind = field_bytes(&fields, CONF_KIND).map(|b| b[0]).unwrap_or(0);
    let confidence_type = match kind {
        1 => ConfidenceType::Building {
            appeared_at_height: field_u64(&fields, CONF_APPEARED_AT_HEIGHT).unwrap_or(0),
            depth: field_u32(&fields, CONF_DEPTH).unwrap_or(0),
        },
        2 => ConfidenceType::Pending,
        3 => {
            let mut hash = [0u8; 32];
            if let Some(b) = field_bytes(&fields, CONF_OVERRIDING_TX) {
                hash.copy_from_slice(b);
            }
            ConfidenceType::Dead { overriding_tx: hash }
        }
        4 => ConfidenceType::InConflict,
        _ => ConfidenceType::Unknown,
    };
    let source = match field_bytes(&fields, CONF_SOURCE).map(|b| b[0]).unwrap_or(2) {
        0 => Source::Myself,
        1 => Source::NetworkBroadcast,
        _ => Source::Unknown,
    };
    Ok(Confidence { confidence_type, broadcast_by: Default::default(), source })
}

fn serialize_transaction(pool: Pool, wtx: &WalletTransaction) -> Vec<u8> {
    let mut w = TlvWriter::new();
    let pool_tag: u8 = match pool {
        Pool::Pending => 0,
        Pool::Unspent => 1,
        Pool::Spent => 2,
        Pool::Dead => 3,
    };
    w.write_field(TX_POOL, true, &[pool_tag]);
    w.write_u32(TX_VERSION, true, wtx.tx.version);
    for input in &wtx.tx.inputs {
        let mut iw = TlvWriter::new();
        iw.write_field(IN_PREV_HASH, true, &input.previous_output.tx_hash);
        iw.write_u32(IN_PREV_INDEX, true, input.previous_output.index);
        iw.write_field(IN_SCRIPT_SIG, true, &input.script_sig);
        iw.write_u32(IN_SEQUENCE, true, input.sequence);
        w.write_field(TX_INPUT, true, &iw.into_bytes());
    }
    for output in &wtx.tx.outputs {
        let mut ow = TlvWriter::new();
        ow.write_u64(OUT_VALUE, true, output.value);
        ow.write_field(OUT_SCRIPT_PUBKEY, true, &output.script_pubkey);
        w.write_field(TX_OUTPUT, true, &ow.into_bytes());
    }
    w.write_u32(TX_LOCK_TIME, true, wtx.tx.lock_time);
    for (block_hash, offset) in &wtx.tx.appearances {
        let mut aw = TlvWriter::new();
        aw.write_field(APP_BLOCK_HASH, true, block_hash);
        aw.write_u32(APP_OFFSET, true, *offset);
        w.write_field(TX_APPEARANCE, false, &aw.into_bytes());
    }
    w.write_u64(TX_UPDATE_TIME, false, wtx.tx.update_time);
    w.write_field(TX_PURPOSE, false, &[purpose_to_byte(wtx.tx.purpose)]);
    if let Some(memo) = &wtx.tx.memo {
        w.write_str(TX_MEMO, false, memo);
    }
    if let Some(rate) = wtx.tx.exchange_rate {
        w.write_field(TX_EXCHANGE_RATE, false, &rate.to_le_bytes());
    }
    w.write_field(TX_CONFIDENCE, true, &serialize_confidence(&wtx.confidence));
    for (index, spender) in &wtx.spent_outputs {
        let mut sw = TlvWriter::new();
        sw.write_u32(SPENT_INDEX, true, *index);
        sw.write_field(SPENT_SPENDER_HASH, true, spender);
        w.write_field(TX_SPENT_OUTPUT, false, &sw.into_bytes());
    }
    w.into_bytes()
}

fn purpose_to_byte(purpose: crate::tx::Purpose) -> u8 {
    use crate::tx::Purpose::*;
    match purpose {
        UserPayment => 0,
        KeyRotation => 1,
        AssurancePledge => 2,
        AssuranceClaim => 3,
        RaiseFee => 4,
        Unknown => 5,
    }
}

fn byte_to_purpose(b: u8) -> crate::tx::Purpose {
    use crate::tx::Purpose::*;
    match b {
        0 => UserPayment,
        1 => KeyRotation,
        2 => AssurancePledge,
        3 => AssuranceClaim,
        4 => RaiseFee,
        _ => Unknown,
    }
}

fn deserialize_transaction(bytes: &[u8], require_mandatory: bool) -> Result<(Pool, WalletTransaction)> {
    let mut reader = TlvReader::new(bytes);
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut appearances = std::collections::BTreeMap::new();
    let mut spent_outputs = std::collections::BTreeMap::new();
    let mut pool = Pool::Pending;
    let mut version = 1u32;
    let mut lock_time = 0u32;
    let mut update_time = 0u64;
    let mut purpose = crate::tx::Purpose::Unknown;
    let mut memo = None;
    let mut exchange_rate = None;
    let mut confidence = Confidence::new(Source::Unknown);

    while let Some(field) = reader.next_field()? {
        match field.tag {
            TX_POOL => {
                pool = match field.bytes.first().copied().unwrap_or(0) {
                    0 => Pool::Pending,
                    1 => Pool::Unspent,
                    2 => Pool::Spent,
                    _ => Pool::Dead,
                }
            }
            TX_VERSION => version = u32::from_le_bytes(field.bytes[..4].try_into().expect("4 bytes")),
            TX_INPUT => {
                let mut ir = TlvReader::new(&field.bytes);
                let ifields = ir.read_all(&[IN_PREV_HASH, IN_PREV_INDEX, IN_SCRIPT_SIG, IN_SEQUENCE], require_mandatory)?;
                let mut prev_hash = [0u8; 32];
                if let Some(b) = field_bytes(&ifields, IN_PREV_HASH) {
                    prev_hash.copy_from_slice(b);
                }
                inputs.push(TxIn {
                    previous_output: OutPoint { tx_hash: prev_hash, index: field_u32(&ifields, IN_PREV_INDEX).unwrap_or(0) },
                    script_sig: field_bytes(&ifields, IN_SCRIPT_SIG).unwrap_or(&[]).to_vec(),
                    sequence: field_u32(&ifields, IN_SEQUENCE).unwrap_or(0xFFFF_FFFF),
                });
            }
            TX_OUTPUT => {
                let mut or_ = TlvReader::new(&field.bytes);
                let ofields = or_.read_all(&[OUT_VALUE, OUT_SCRIPT_PUBKEY], require_mandatory)?;
                outputs.push(TxOut {
                    value: field_u64(&ofields, OUT_VALUE).unwrap_or(0),
                    script_pubkey: field_bytes(&ofields, OUT_SCRIPT_PUBKEY).unwrap_or(&[]).to_vec(),
                });
            }
            TX_LOCK_TIME => lock_time = u32::from_le_bytes(field.bytes[..4].try_into().expect("4 bytes")),
            TX_APPEARANCE => {
                let mut ar = TlvReader::new(&field.bytes);
                let afields = ar.read_all(&[APP_BLOCK_HASH, APP_OFFSET], require_mandatory)?;
                let mut block_hash = [0u8; 32];
                if let Some(b) = field_bytes(&afields, APP_BLOCK_HASH) {
                    block_hash.copy_from_slice(b);
                }
                appearances.insert(block_hash, field_u32(&afields, APP_OFFSET).unwrap_or(0));
            }
            TX_UPDATE_TIME => update_time = u64::from_le_bytes(field.bytes[..8].try_into().expect("8 bytes")),
            TX_PURPOSE => purpose = byte_to_purpose(field.bytes.first().copied().unwrap_or(5)),
            TX_MEMO => memo = Some(String::from_utf8_lossy(&field.bytes).into_owned()),
            TX_EXCHANGE_RATE => exchange_rate = Some(f64::from_le_bytes(field.bytes[..8].try_into().expect("8 bytes"))),
            TX_CONFIDENCE => confidence = deserialize_confidence(&field.bytes, require_mandatory)?,
            TX_SPENT_OUTPUT => {
                let mut sr = TlvReader::new(&field.bytes);
                let sfields = sr.read_all(&[SPENT_INDEX, SPENT_SPENDER_HASH], require_mandatory)?;
                let mut spender = [0u8; 32];
                if let Some(b) = field_bytes(&sfields, SPENT_SPENDER_HASH) {
                    spender.copy_from_slice(b);
                }
                spent_outputs.insert(field_u32(&sfields, SPENT_INDEX).unwrap_or(0), spender);
            }
            _ if field.mandatory && require_mandatory => {
                return Err(WalletError::Core(CoreError::Other(format!("unknown mandatory transaction field {}", field.tag))));
            }
            _ => {}
        }
    }

    let tx = Transaction { version, inputs, outputs, lock_time, appearances, update_time, purpose, exchange_rate, memo };
    Ok((pool, WalletTransaction { tx, confidence, spent_outputs }))
}

/// Snapshot of everything needed to reconstruct a [`KeyChainGroup`] and
/// [`TransactionPool`] on load.
pub struct WalletSnapshot {
    pub network: Network,
    pub creation_time: u64,
    pub group: KeyChainGroup,
    pub pool: TransactionPool,
    pub watched_scripts: Vec<Vec<u8>>,
    pub last_seen_block: Option<([u8; 32], u64, u64)>,
    pub key_rotation_time: Option<u64>,
}

/// Serialises `snapshot` to bytes.
pub fn serialize(snapshot: &WalletSnapshot) -> Vec<u8> {
    let mut w = TlvWriter::new();
    w.write_u32(T_VERSION, true, FORMAT_VERSION);
    w.write_field(T_NETWORK, true, &[network_to_byte(snapshot.network)]);
    w.write_u64(T_CREATION_TIME, false, snapshot.creation_time);

    for (_, key) in snapshot.group.basic.iter() {
        w.write_field(T_BASIC_KEY, true, &serialize_single_key(key));
    }
    for chain in &snapshot.group.hd_chains {
        let bytes = serialize_hd_chain(chain, snapshot.network).expect("in-memory chain always has a root key");
        w.write_field(T_HD_CHAIN, true, &bytes);
    }
    if let Some(crypter) = &snapshot.group.crypter {
        let mut cw = TlvWriter::new();
        cw.write_field(1, true, &[crypter.cost.log_n]);
        cw.write_u32(2, true, crypter.cost.r);
        cw.write_u32(3, true, crypter.cost.p);
        cw.write_field(4, true, &crypter.cost.salt);
        cw.write_u64(5, true, crypter.id);
        w.write_field(T_CRYPTER_COST, true, &cw.into_bytes());
    }

    for script in &snapshot.watched_scripts {
        w.write_field(T_WATCHED_SCRIPT, false, script);
    }

    let pools = snapshot.pool.pools();
    for (pool_tag, map) in [
        (Pool::Pending, &pools.pending),
        (Pool::Unspent, &pools.unspent),
        (Pool::Spent, &pools.spent),
        (Pool::Dead, &pools.dead),
    ] {
        for wtx in map.values() {
            w.write_field(T_TRANSACTION, true, &serialize_transaction(pool_tag, wtx));
        }
    }

    if let Some((hash, height, time)) = snapshot.last_seen_block {
        w.write_field(T_LAST_BLOCK_HASH, false, &hash);
        w.write_u64(T_LAST_BLOCK_HEIGHT, false, height);
        w.write_u64(T_LAST_BLOCK_TIME, false, time);
    }
    if let Some(t) = snapshot.key_rotation_time {
        w.write_u64(T_KEY_ROTATION_TIME, false, t);
    }

    w.into_bytes()
}

/// Reconstructs a [`WalletSnapshot`] from bytes written by [`serialize`].
pub fn deserialize(bytes: &[u8], config: WalletConfig) -> Result<WalletSnapshot> {
    let require_mandatory = config.require_mandatory_extensions;
    let known = [
        T_VERSION,
        T_NETWORK,
        T_CREATION_TIME,
        T_BASIC_KEY,
        T_HD_CHAIN,
        T_TRANSACTION,
        T_WATCHED_SCRIPT,
        T_LAST_BLOCK_HASH,
        T_LAST_BLOCK_HEIGHT,
        T_LAST_BLOCK_TIME,
        T_CRYPTER_COST,
        T_KEY_ROTATION_TIME,
    ];
    let mut reader = TlvReader::new(bytes);
    let fields = reader.read_all(&known, require_mandatory)?;

    let network = byte_to_network(field_bytes(&fields, T_NETWORK).map(|b| b[0]).unwrap_or(0))?;
    let creation_time = field_u64(&fields, T_CREATION_TIME).unwrap_or(0);

    let mut group = KeyChainGroup::new();
    for field in fields.iter().filter(|f| f.tag == T_BASIC_KEY) {
        group.basic.import(deserialize_single_key(&field.bytes, require_mandatory)?)?;
    }
    for field in fields.iter().filter(|f| f.tag == T_HD_CHAIN) {
        group.hd_chains.push(deserialize_hd_chain(&field.bytes, require_mandatory)?);
    }
    if let Some(field) = fields.iter().find(|f| f.tag == T_CRYPTER_COST) {
        let mut cr = TlvReader::new(&field.bytes);
        let cfields = cr.read_all(&[1, 2, 3, 4, 5], require_mandatory)?;
        let log_n = field_bytes(&cfields, 1).map(|b| b[0]).unwrap_or(14);
        let r = field_u32(&cfields, 2).unwrap_or(8);
        let p = field_u32(&cfields, 3).unwrap_or(1);
        let mut salt = [0u8; 8];
        if let Some(b) = field_bytes(&cfields, 4) {
            salt.copy_from_slice(b);
        }
        let id = field_u64(&cfields, 5).unwrap_or(0);
        group.crypter = Some(KeyCrypter::from_cost(id, ScryptCost { log_n, r, p, salt }));
    }

    let watched_scripts: Vec<Vec<u8>> = fields.iter().filter(|f| f.tag == T_WATCHED_SCRIPT).map(|f| f.bytes.clone()).collect();

    let mut pool = TransactionPool::new(config);
    for field in fields.iter().filter(|f| f.tag == T_TRANSACTION) {
        let (pool_tag, wtx) = deserialize_transaction(&field.bytes, require_mandatory)?;
        pool.pools_mut().insert(pool_tag, wtx);
    }

    let last_seen_block = match (
        field_bytes(&fields, T_LAST_BLOCK_HASH),
        field_u64(&fields, T_LAST_BLOCK_HEIGHT),
        field_u64(&fields, T_LAST_BLOCK_TIME),
    ) {
        (Some(hash_bytes), Some(height), Some(time)) => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(hash_bytes);
            Some((hash, height, time))
        }
        _ => None,
    };
    let key_rotation_time = field_u64(&fields, T_KEY_ROTATION_TIME);

    Ok(WalletSnapshot { network, creation_time, group, pool, watched_scripts, last_seen_block, key_rotation_time })
}

/// Writes `snapshot` to `path` atomically: serialises to a temp file in the
/// same directory, then renames it over the destination.
pub fn save_to_file(snapshot: &WalletSnapshot, path: &Path) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| WalletError::Core(CoreError::Other(e.to_string())))?;
    tmp.write_all(&serialize(snapshot)).map_err(|e| WalletError::Core(CoreError::Other(e.to_string())))?;
    tmp.persist(path).map_err(|e| WalletError::Core(CoreError::Other(e.to_string())))?;
    Ok(())
}

pub fn load_from_file(path: &Path, config: WalletConfig) -> Result<WalletSnapshot> {
    let bytes = fs::read(path).map_err(|e| WalletError::Core(CoreError::Other(e.to_string())))?;
    deserialize(&bytes, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::Source;
    use crate::tx::Transaction;

    fn sample_group() -> KeyChainGroup {
        let mut group = KeyChainGroup::new();
        group.hd_chains.push(KeyChain::from_seed(&[9u8; 32], 10, 5, 1_700_000_000).unwrap());
        group.basic.import(SingleKey::generate(1_700_000_000)).unwrap();
        group
    }

    #[test]
    fn roundtrips_basic_key_and_hd_chain() {
        let group = sample_group();
        let pool = TransactionPool::new(WalletConfig::default());
        let snapshot = WalletSnapshot {
            network: Network::Mainnet,
            creation_time: 1_700_000_000,
            group,
            pool,
            watched_scripts: vec![],
            last_seen_block: Some(([7u8; 32], 42, 1_700_000_100)),
            key_rotation_time: None,
        };
        let bytes = serialize(&snapshot);
        let restored = deserialize(&bytes, WalletConfig::default()).unwrap();

        assert_eq!(restored.network, Network::Mainnet);
        assert_eq!(restored.group.basic.len(), 1);
        assert_eq!(restored.group.hd_chains.len(), 1);
        assert_eq!(restored.last_seen_block, Some(([7u8; 32], 42, 1_700_000_100)));
    }

    #[test]
    fn roundtrips_pending_transaction_with_confidence() {
        let mut pool = TransactionPool::new(WalletConfig::default());
        let tx = Transaction::new(vec![], vec![TxOut { value: 50_000, script_pubkey: vec![0u8; 25] }], 0);
        let hash = tx.hash();
        pool.pools_mut().insert(Pool::Pending, WalletTransaction::new_pending(tx, Source::NetworkBroadcast));

        let snapshot = WalletSnapshot {
            network: Network::Testnet,
            creation_time: 0,
            group: KeyChainGroup::new(),
            pool,
            watched_scripts: vec![],
            last_seen_block: None,
            key_rotation_time: None,
        };
        let bytes = serialize(&snapshot);
        let restored = deserialize(&bytes, WalletConfig::default()).unwrap();
        assert!(restored.pool.pools().pending.contains_key(&hash));
    }

    #[test]
    fn unknown_mandatory_extension_rejected_when_required() {
        let mut w = TlvWriter::new();
        w.write_u32(T_VERSION, true, FORMAT_VERSION);
        w.write_field(T_NETWORK, true, &[0]);
        w.write_field(999, true, b"future field");
        let bytes = w.into_bytes();

        let mut cfg = WalletConfig::default();
        cfg.require_mandatory_extensions = true;
        assert!(deserialize(&bytes, cfg).is_err());

        let mut cfg2 = WalletConfig::default();
        cfg2.require_mandatory_extensions = false;
        assert!(deserialize(&bytes, cfg2).is_ok());
    }
}
