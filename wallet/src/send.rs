//! Send Pipeline: builds, selects coins for, signs and commits an outbound
//! transaction.

use wallet_core::config::{Network, WalletConfig};
use wallet_core::ecc::sign_der;
use wallet_core::script::ScriptPubKey;
use wallet_core::Error as CoreError;

use crate::coinselector::{CandidateOutput, CoinSelector, DefaultCoinSelector, Selection};
use crate::confidence::Source;
use crate::error::{Result, WalletError};
use crate::keychain::Purpose;
use crate::keychain_group::KeyChainGroup;
use crate::pool::Pools;
use crate::tx::{OutPoint, Transaction, TxIn, TxOut};
use crate::txpool::TransactionPool;

const SIGHASH_ALL: u8 = 0x01;

/// Bundles everything needed to build and sign one outbound transaction.
pub struct SendRequest {
    pub outputs: Vec<TxOut>,
    pub fee_per_kb: u64,
    pub shuffle_outputs: bool,
    pub aes_key: Option<[u8; 32]>,
    pub coin_selector: Option<Box<dyn CoinSelector>>,
    pub change_address: Option<String>,
    pub allow_unconfirmed: bool,
    pub empty_wallet: bool,
}

impl SendRequest {
    pub fn pay_to(script_pubkey: Vec<u8>, value: u64, fee_per_kb: u64) -> Self {
        Self {
            outputs: vec![TxOut { value, script_pubkey }],
            fee_per_kb,
            shuffle_outputs: false,
            aes_key: None,
            coin_selector: None,
            change_address: None,
            allow_unconfirmed: false,
            empty_wallet: false,
        }
    }
}

/// Enumerates every output currently in our Unspent pool (plus allowed
/// unconfirmed own-change) as a spend candidate.
fn enumerate_candidates(pools: &Pools, allow_unconfirmed: bool) -> Vec<CandidateOutput> {
    let mut candidates = Vec::new();
    for (hash, wtx) in pools.unspent.iter() {
        for (index, output) in wtx.tx.outputs.iter().enumerate() {
            if wtx.spent_outputs.contains_key(&(index as u32)) {
                continue;
            }
            candidates.push(CandidateOutput {
                outpoint: OutPoint { tx_hash: *hash, index: index as u32 },
                value: output.value,
                script_pubkey: output.script_pubkey.clone(),
                confirmations: wtx.confidence.depth().max(1),
                is_coinbase: false,
                is_own_change: false,
            });
        }
    }
    if allow_unconfirmed {
        for (hash, wtx) in pools.pending.iter() {
            if !matches!(wtx.confidence.source, crate::confidence::Source::Myself) {
                continue;
            }
            for (index, output) in wtx.tx.outputs.iter().enumerate() {
                if wtx.spent_outputs.contains_key(&(index as u32)) {
                    continue;
                }
                candidates.push(CandidateOutput {
                    outpoint: OutPoint { tx_hash: *hash, index: index as u32 },
                    value: output.value,
                    script_pubkey: output.script_pubkey.clone(),
                    confirmations: 0,
                    is_coinbase: false,
                    is_own_change: true,
                });
            }
        }
    }
    candidates
}

fn fee_for_size(size: usize, fee_per_kb: u64) -> u64 {
    (size as u64 * fee_per_kb).div_ceil(1000)
}

/// Runs the selection/change/fee-reestimation loop and returns the unsigned
/// transaction plus the candidates it spends.
fn build_unsigned(
    config: &WalletConfig,
    request: &SendRequest,
    pools: &Pools,
    change_script: Vec<u8>,
) -> Result<(Transaction, Selection)> {
    if request.outputs.iter().filter(|o| matches!(o.classify(), ScriptPubKey::Other(ref s) if s.first() == Some(&0x6a))).count() > 1 {
        return Err(WalletError::MultipleOpReturnRequested);
    }

    let target: u64 = request.outputs.iter().map(|o| o.value).sum();
    let selector: &dyn CoinSelector = request.coin_selector.as_deref().unwrap_or(&DefaultCoinSelector);
    let candidates = enumerate_candidates(pools, request.allow_unconfirmed);

    let mut fee = fee_for_size(200, request.fee_per_kb);
    let mut selection;
    loop {
        selection = selector.select(config, target + fee, &candidates);
        if selection.total_value < target + fee {
            if request.empty_wallet && !selection.selected.is_empty() {
                break;
            }
            return Err(WalletError::InsufficientMoney { missing: (target + fee).saturating_sub(selection.total_value) });
        }

        let mut outputs = request.outputs.clone();
        let change_value = selection.total_value.saturating_sub(target + fee);
        if change_value > 0 {
            if change_value < config.dust_threshold {
                if request.empty_wallet {
                    // Folding dust-sized change into the fee is acceptable
                    // when sweeping the wallet; otherwise this is an error.
                } else {
                    return Err(WalletError::CouldNotAdjustDownwards);
                }
            } else {
                outputs.push(TxOut { value: change_value, script_pubkey: change_script.clone() });
            }
        }

        if outputs.iter().any(|o| o.value > 0 && o.value < config.dust_threshold) {
            return Err(WalletError::DustySend);
        }

        let inputs: Vec<TxIn> = selection
            .selected
            .iter()
            .map(|c| TxIn { previous_output: c.outpoint.clone(), script_sig: Vec::new(), sequence: 0xFFFF_FFFF })
            .collect();
        let tx = Transaction::new(inputs, outputs, 0);

        let refined_fee = fee_for_size(tx.estimated_size(), request.fee_per_kb);
        if refined_fee == fee {
            if tx.estimated_size() > config.max_transaction_size {
                return Err(WalletError::ExceededMaxTransactionSize);
            }
            return Ok((tx, selection));
        }
        fee = refined_fee;
    }

    let inputs: Vec<TxIn> = selection
        .selected
        .iter()
        .map(|c| TxIn { previous_output: c.outpoint.clone(), script_sig: Vec::new(), sequence: 0xFFFF_FFFF })
        .collect();
    let tx = Transaction::new(inputs, request.outputs.clone(), 0);
    Ok((tx, selection))
}

/// Signs every input of `tx`, locating the signing key via `group` for each
/// spent candidate's script. Every input signs the same digest, taken over
/// the transaction before any scriptSig is filled in.
fn sign_transaction(
    group: &KeyChainGroup,
    tx: &mut Transaction,
    selection: &Selection,
    aes_key: Option<[u8; 32]>,
) -> Result<()> {
    let sighash = wallet_core::ecc::sha256d(&tx.hash());
    for (index, candidate) in selection.selected.iter().enumerate() {
        let script_class = ScriptPubKey::classify(&candidate.script_pubkey);
        let hash = match script_class {
            ScriptPubKey::PayToPubkeyHash(h) => h,
            _ => return Err(WalletError::MissingSigningKey(index)),
        };
        let single = group.find_key_from_pubhash(&hash).ok_or(WalletError::MissingSigningKey(index))?;

        let secret = if single.is_encrypted() {
            let crypter = group.crypter.as_ref().ok_or(WalletError::MissingPassword)?;
            let aes = aes_key.ok_or(WalletError::MissingPassword)?;
            let decrypted = single.decrypt(crypter, &aes).map_err(|_| WalletError::WrongPassword)?;
            decrypted.keypair.secret.expect("decrypt yields a plaintext key")
        } else {
            single.keypair.secret.ok_or_else(|| WalletError::Core(CoreError::KeyIsWatchingOnly))?
        };

        let sig = sign_der(&secret, &sighash, SIGHASH_ALL)?;
        let pubkey_bytes = single.public_key_bytes();

        let mut script_sig = Vec::with_capacity(sig.len() + pubkey_bytes.len() + 2);
        script_sig.push(sig.len() as u8);
        script_sig.extend_from_slice(&sig);
        script_sig.push(pubkey_bytes.len() as u8);
        script_sig.extend_from_slice(&pubkey_bytes);
        tx.inputs[index].script_sig = script_sig;
    }
    Ok(())
}

/// Runs the full pipeline: select, build, sign, and commit `request` as a
/// new pending transaction sourced from this wallet.
pub fn complete_and_commit(
    config: &WalletConfig,
    network: Network,
    pool: &mut TransactionPool,
    group: &mut KeyChainGroup,
    mut request: SendRequest,
) -> Result<Transaction> {
    let change_script = match &request.change_address {
        Some(addr) => {
            let (version, hash) = wallet_core::ecc::base58check_decode(addr)?;
            if version != network.p2pkh_version() {
                return Err(WalletError::Core(CoreError::AddressFormat("change address is for the wrong network".into())));
            }
            ScriptPubKey::p2pkh_script(&hash)
        }
        None => {
            let key_id = group.hd_chains.last_mut().ok_or(WalletError::DeterministicUpgradeRequired)?.get_key(Purpose::Change)?;
            let hash = group.hd_chains.last().unwrap().arena.get(key_id).pubkey_hash();
            ScriptPubKey::p2pkh_script(&hash)
        }
    };

    if request.shuffle_outputs {
        use rand::seq::SliceRandom;
        request.outputs.shuffle(&mut rand::thread_rng());
    }

    let (mut tx, selection) = build_unsigned(config, &request, pool.pools(), change_script)?;
    sign_transaction(group, &mut tx, &selection, request.aes_key)?;

    let hash = tx.hash();
    tracing::info!(?hash, inputs = selection.selected.len(), outputs = tx.outputs.len(), "send: committing signed transaction");
    pool.receive_pending(tx.clone(), Source::Myself, group)?;
    Ok(tx)
}
