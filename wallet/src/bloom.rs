//! Bloom-filter provider contract (spec.md §6).
//!
//! Distribution and matching against the peer-to-peer network are out of
//! scope; this module only builds the set of elements a filter must
//! contain so that nothing belonging to this wallet — including every
//! lookahead key — is missed by a downstream Bloom filter.

use wallet_core::ecc::sha256d;

use crate::keychain_group::KeyChainGroup;

/// One element a Bloom filter must cover: a public key, a public-key hash,
/// or a watched script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterElement {
    PublicKey(Vec<u8>),
    PubkeyHash([u8; 20]),
    Script(Vec<u8>),
}

/// Parameters a caller supplies when asking for filter elements; the
/// filter's bit array and hash functions are the peer layer's concern, out
/// of scope here.
#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    pub size_bytes: usize,
    pub false_positive_rate: f64,
    pub tweak: u32,
}

/// Collects every element that could match funds belonging to the group,
/// including all precomputed lookahead keys (spec.md §6: "including all
/// lookahead keys").
pub fn collect_elements(group: &KeyChainGroup, watched_scripts: &[Vec<u8>]) -> Vec<FilterElement> {
    let mut elements = Vec::new();

    for (_, key) in group.basic.iter() {
        elements.push(FilterElement::PublicKey(key.public_key_bytes()));
        elements.push(FilterElement::PubkeyHash(key.pubkey_hash()));
    }

    for chain in &group.hd_chains {
        for (_, key) in chain.arena.iter() {
            elements.push(FilterElement::PublicKey(key.public_key_bytes()));
            elements.push(FilterElement::PubkeyHash(key.pubkey_hash()));
        }
    }

    for script in watched_scripts {
        elements.push(FilterElement::Script(script.clone()));
    }

    elements
}

/// Deterministic tweak-seeded hash used to index a bit in the caller's
/// filter array; exposed so peer-layer code (out of scope) can reproduce
/// the same indexing this wallet assumes.
pub fn filter_hash(element: &[u8], tweak: u32, seed: u32) -> u64 {
    let mut data = Vec::with_capacity(element.len() + 8);
    data.extend_from_slice(element);
    data.extend_from_slice(&seed.to_le_bytes());
    data.extend_from_slice(&tweak.to_le_bytes());
    let digest = sha256d(&data);
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keychain::KeyChain;
    use wallet_core::hd::mnemonic::Mnemonic;

    #[test]
    fn collects_lookahead_keys_not_just_issued() {
        let mnemonic = Mnemonic::from_entropy(&[3u8; 16]).unwrap();
        let seed = mnemonic.to_seed("");
        let chain = KeyChain::from_seed(&seed[..], 10, 5, 0).unwrap();
        let mut group = KeyChainGroup::new();
        group.hd_chains.push(chain);

        let elements = collect_elements(&group, &[]);
        // lookahead_size=10 keys precomputed per branch even though none issued.
        assert!(elements.len() >= 20);
    }
}
