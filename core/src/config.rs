//! Wallet-wide tunables shared by both crates.
//!
//! [`WalletConfig`] centralises parameters such as network selection, the
//! dust threshold and the key-chain lookahead. It is built via the fluent
//! [`WalletConfigBuilder`], mirroring the teacher's `Config`/`ConfigBuilder`
//! split so read access stays a plain field lookup while mutation goes
//! through validated builder methods.

use serde::{Deserialize, Serialize};

/// Which Bitcoin network addresses and extended keys are encoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Base58Check version byte for a pay-to-pubkey-hash address.
    pub fn p2pkh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6F,
        }
    }

    /// Base58Check version byte for a pay-to-script-hash address.
    pub fn p2sh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet => 0xC4,
        }
    }

    /// 4-byte BIP32 version prefix for an extended private key.
    pub fn xprv_version(self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0x04, 0x88, 0xAD, 0xE4],
            Network::Testnet => [0x04, 0x35, 0x83, 0x94],
        }
    }

    /// 4-byte BIP32 version prefix for an extended public key.
    pub fn xpub_version(self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0x04, 0x88, 0xB2, 0x1E],
            Network::Testnet => [0x04, 0x35, 0x87, 0xCF],
        }
    }
}

/// Runtime configuration shared across both crates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Which network addresses/extended keys are encoded for.
    pub network: Network,

    /// Smallest output value (satoshis) considered economic to spend later.
    /// Defaults to the P2PKH dust figure at a 10,000 sat/kB reference rate
    /// (spec.md §4.7: "≈ 2,730 sat").
    pub dust_threshold: u64,

    /// Gap-limit size: how many keys beyond `issued` are kept precomputed.
    pub lookahead_size: u32,

    /// Gap-limit threshold: precomputation is extended once the remaining
    /// precomputed buffer falls below this many keys.
    pub lookahead_threshold: u32,

    /// Hard ceiling on a constructed transaction's serialised size in bytes.
    pub max_transaction_size: usize,

    /// Confirmations required before a coinbase output may be spent.
    pub spendable_coinbase_depth: u32,

    /// If true, loading a serialised wallet fails when an unknown extension
    /// field has its mandatory bit set. If false, unknown mandatory
    /// extensions are silently skipped.
    pub require_mandatory_extensions: bool,

    /// If true, a transaction the risk analyser flags (dust output,
    /// non-standard output, non-final locktime) is still accepted into the
    /// pending pool instead of being dropped (spec.md §4.6 step 1, §4.7).
    pub accept_risky: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            dust_threshold: 2_730,
            lookahead_size: 100,
            lookahead_threshold: 50,
            max_transaction_size: 100_000,
            spendable_coinbase_depth: 100,
            require_mandatory_extensions: true,
            accept_risky: false,
        }
    }
}

/// Fluent builder for [`WalletConfig`].
pub struct WalletConfigBuilder {
    inner: WalletConfig,
}

impl WalletConfigBuilder {
    /// Starts a new builder pre-populated with [`WalletConfig::default`].
    pub fn new() -> Self {
        Self { inner: WalletConfig::default() }
    }

    pub fn network(mut self, network: Network) -> Self {
        self.inner.network = network;
        self
    }

    pub fn dust_threshold(mut self, sats: u64) -> Self {
        self.inner.dust_threshold = sats;
        self
    }

    pub fn lookahead(mut self, size: u32, threshold: u32) -> Self {
        self.inner.lookahead_size = size;
        self.inner.lookahead_threshold = threshold;
        self
    }

    pub fn max_transaction_size(mut self, bytes: usize) -> Self {
        self.inner.max_transaction_size = bytes;
        self
    }

    pub fn spendable_coinbase_depth(mut self, depth: u32) -> Self {
        self.inner.spendable_coinbase_depth = depth;
        self
    }

    pub fn require_mandatory_extensions(mut self, required: bool) -> Self {
        self.inner.require_mandatory_extensions = required;
        self
    }

    pub fn accept_risky(mut self, accept: bool) -> Self {
        self.inner.accept_risky = accept;
        self
    }

    /// Consumes the builder returning an immutable configuration value.
    pub fn finish(self) -> WalletConfig {
        self.inner
    }
}

impl Default for WalletConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_fields() {
        let cfg = WalletConfigBuilder::new()
            .network(Network::Testnet)
            .dust_threshold(1_000)
            .lookahead(50, 20)
            .finish();
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.dust_threshold, 1_000);
        assert_eq!(cfg.lookahead_size, 50);
        assert_eq!(cfg.lookahead_threshold, 20);
    }

    #[test]
    fn default_matches_mainnet_dust_figure() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.dust_threshold, 2_730);
        assert_eq!(cfg.network.p2pkh_version(), 0x00);
        assert_eq!(cfg.network.p2sh_version(), 0x05);
    }
}
