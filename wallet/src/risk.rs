//! Risk analysis: a pure function judging whether an incoming transaction
//! is safe to accept into the Pending pool.
//!
//! spec.md §9 Open Question (b) notes the source API is stateful ("cannot
//! be used twice"); this rewrite drops that lifecycle constraint entirely
//! and makes the analyser a plain `(deps, tx) -> Verdict` function, per
//! DESIGN.md's resolution.

use wallet_core::config::WalletConfig;

use crate::tx::Transaction;

/// Inputs the risk analyser needs beyond the transaction itself.
pub struct RiskDeps<'a> {
    pub config: &'a WalletConfig,
}

/// The analyser's verdict. `NonStandard`/`Dust` findings are advisory: the
/// caller (the transaction pool) still accepts the transaction when
/// `accept_risky` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// The transaction's own nLockTime/nSequence fields say it is not yet
    /// final (mirrors bitcoinj's `NonFinal` risk, which is about locktime
    /// finality, not about whose wallet the spent inputs belong to).
    NonFinal,
    /// Indices of outputs below the configured dust threshold.
    Dust(Vec<usize>),
    NonStandard,
}

impl Verdict {
    pub fn is_risky(&self) -> bool {
        !matches!(self, Verdict::Ok)
    }
}

/// Judges `tx` for acceptance into the pending pool.
pub fn analyze(deps: &RiskDeps<'_>, tx: &Transaction) -> Verdict {
    let dusty: Vec<usize> = tx
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, out)| out.value < deps.config.dust_threshold)
        .map(|(i, _)| i)
        .collect();
    if !dusty.is_empty() {
        return Verdict::Dust(dusty);
    }

    if tx.outputs.iter().any(|out| !out.classify().is_standard()) {
        return Verdict::NonStandard;
    }

    if !is_final(tx) {
        return Verdict::NonFinal;
    }

    Verdict::Ok
}

/// A transaction is final when its locktime is zero, or when every input
/// opts out of locktime via `nSequence = 0xFFFFFFFF`. An ordinary received
/// payment (locktime 0, regardless of whose outputs its inputs spend) is
/// always final by this rule.
fn is_final(tx: &Transaction) -> bool {
    tx.lock_time == 0 || tx.inputs.iter().all(|input| input.sequence == 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{OutPoint, TxIn, TxOut};
    use wallet_core::script::ScriptPubKey;

    #[test]
    fn dust_output_flagged() {
        let config = WalletConfig::default();
        let deps = RiskDeps { config: &config };
        let tx = Transaction::new(
            vec![],
            vec![TxOut { value: 100, script_pubkey: ScriptPubKey::p2pkh_script(&[0u8; 20]) }],
            0,
        );
        assert_eq!(analyze(&deps, &tx), Verdict::Dust(vec![0]));
    }

    #[test]
    fn clean_transaction_is_ok() {
        let config = WalletConfig::default();
        let deps = RiskDeps { config: &config };
        let tx = Transaction::new(
            vec![],
            vec![TxOut { value: 100_000, script_pubkey: ScriptPubKey::p2pkh_script(&[0u8; 20]) }],
            0,
        );
        assert_eq!(analyze(&deps, &tx), Verdict::Ok);
    }

    /// A genuine inbound payment spends the payer's outputs, which this
    /// wallet never tracks — that alone must not make it look non-final.
    #[test]
    fn payment_spending_untracked_inputs_is_ok() {
        let config = WalletConfig::default();
        let deps = RiskDeps { config: &config };
        let tx = Transaction::new(
            vec![TxIn { previous_output: OutPoint { tx_hash: [3u8; 32], index: 0 }, script_sig: vec![], sequence: 0xFFFF_FFFF }],
            vec![TxOut { value: 100_000, script_pubkey: ScriptPubKey::p2pkh_script(&[0u8; 20]) }],
            0,
        );
        assert_eq!(analyze(&deps, &tx), Verdict::Ok);
    }

    #[test]
    fn nonzero_locktime_with_non_final_sequence_is_flagged() {
        let config = WalletConfig::default();
        let deps = RiskDeps { config: &config };
        let mut tx = Transaction::new(
            vec![TxIn { previous_output: OutPoint { tx_hash: [3u8; 32], index: 0 }, script_sig: vec![], sequence: 0 }],
            vec![TxOut { value: 100_000, script_pubkey: ScriptPubKey::p2pkh_script(&[0u8; 20]) }],
            0,
        );
        tx.lock_time = 700_000;
        assert_eq!(analyze(&deps, &tx), Verdict::NonFinal);
    }
}
