//! Coin selection: candidate output enumeration and the default selection
//! policy (spec.md §4.7).

use wallet_core::config::WalletConfig;

use crate::tx::OutPoint;

/// One spendable output this wallet could use as a transaction input.
#[derive(Debug, Clone)]
pub struct CandidateOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Vec<u8>,
    /// 0 for an output that has not yet confirmed.
    pub confirmations: u32,
    pub is_coinbase: bool,
    /// True when the parent transaction was created by this wallet (so an
    /// unconfirmed change output may still be spent if the request allows
    /// unconfirmed inputs).
    pub is_own_change: bool,
}

/// Result of a selection pass.
#[derive(Debug, Clone)]
pub struct Selection {
    pub selected: Vec<CandidateOutput>,
    pub total_value: u64,
}

/// Pluggable selection policy, so callers can override the default greedy
/// accumulator (spec.md §4.7: "optional coin selector override").
pub trait CoinSelector {
    fn select(&self, config: &WalletConfig, target: u64, candidates: &[CandidateOutput]) -> Selection;
}

/// Sorts candidates by (confirmation depth desc, value desc, hash asc) for
/// a deterministic tie-break, filters out coinbase outputs still below the
/// spendable depth, then greedily accumulates until `sum >= target`.
pub struct DefaultCoinSelector;

impl CoinSelector for DefaultCoinSelector {
    fn select(&self, config: &WalletConfig, target: u64, candidates: &[CandidateOutput]) -> Selection {
        let mut eligible: Vec<&CandidateOutput> = candidates
            .iter()
            .filter(|c| !c.is_coinbase || c.confirmations >= config.spendable_coinbase_depth)
            .collect();

        eligible.sort_by(|a, b| {
            b.confirmations
                .cmp(&a.confirmations)
                .then_with(|| b.value.cmp(&a.value))
                .then_with(|| a.outpoint.tx_hash.cmp(&b.outpoint.tx_hash))
        });

        let mut selected = Vec::new();
        let mut total = 0u64;
        for candidate in eligible {
            if total >= target {
                break;
            }
            total += candidate.value;
            selected.push(candidate.clone());
        }

        Selection { selected, total_value: total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(hash_byte: u8, value: u64, confirmations: u32) -> CandidateOutput {
        CandidateOutput {
            outpoint: OutPoint { tx_hash: [hash_byte; 32], index: 0 },
            value,
            script_pubkey: vec![],
            confirmations,
            is_coinbase: false,
            is_own_change: false,
        }
    }

    #[test]
    fn greedily_accumulates_highest_confidence_first() {
        let config = WalletConfig::default();
        let candidates = vec![candidate(1, 10_000, 1), candidate(2, 50_000, 6), candidate(3, 20_000, 3)];
        let selection = DefaultCoinSelector.select(&config, 40_000, &candidates);
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.total_value, 50_000);
    }

    #[test]
    fn coinbase_below_spendable_depth_is_excluded() {
        let config = WalletConfig::default();
        let mut immature = candidate(1, 1_000_000, 1);
        immature.is_coinbase = true;
        let candidates = vec![immature, candidate(2, 1_000, 50)];
        let selection = DefaultCoinSelector.select(&config, 500, &candidates);
        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.total_value, 1_000);
    }

    #[test]
    fn tie_broken_deterministically_by_hash() {
        let config = WalletConfig::default();
        let candidates = vec![candidate(9, 1_000, 5), candidate(1, 1_000, 5)];
        let selection = DefaultCoinSelector.select(&config, 1_500, &candidates);
        assert_eq!(selection.selected[0].outpoint.tx_hash[0], 1);
    }
}
