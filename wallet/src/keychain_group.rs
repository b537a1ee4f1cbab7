//! Key Chain Group: aggregation of one basic (imported) chain and an
//! ordered list of HD chains, unified lookup, and the married (multisig)
//! variant. spec.md §4.5.

use std::collections::HashMap;

use wallet_core::config::Network;
use wallet_core::crypter::KeyCrypter;
use wallet_core::Error as CoreError;

use crate::error::{Result, WalletError};
use crate::key::SingleKey;
use crate::keychain::{KeyChain, MarriedKeyChain, Purpose};

/// A flat multiset of imported (non-deterministic) keys, indexed by both
/// their 20-byte HASH160 and their raw public-key bytes so either script
/// form resolves in O(1) (spec.md §4.5).
#[derive(Default, Clone)]
pub struct BasicChain {
    by_hash: HashMap<[u8; 20], SingleKey>,
    hash_by_pubkey: HashMap<Vec<u8>, [u8; 20]>,
}

impl BasicChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Imports `key`, deduplicating by public key. Rejects a key already
    /// present.
    pub fn import(&mut self, key: SingleKey) -> Result<()> {
        let pubkey = key.public_key_bytes();
        if self.hash_by_pubkey.contains_key(&pubkey) {
            return Ok(());
        }
        let hash = key.pubkey_hash();
        self.hash_by_pubkey.insert(pubkey, hash);
        self.by_hash.insert(hash, key);
        Ok(())
    }

    pub fn find_by_hash(&self, hash: &[u8; 20]) -> Option<&SingleKey> {
        self.by_hash.get(hash)
    }

    pub fn find_by_pubkey(&self, pubkey: &[u8]) -> Option<&SingleKey> {
        self.hash_by_pubkey.get(pubkey).and_then(|h| self.by_hash.get(h))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8; 20], &SingleKey)> {
        self.by_hash.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }
}

/// Aggregation of the basic chain plus an ordered list of HD chains. The
/// last entry of `hd_chains` is the active chain that issues fresh keys;
/// older chains exist only to claim funds on rotated-out keys. When
/// `married` is set it supersedes the plain active-chain semantics: fresh
/// addresses come from the married P2SH script map instead.
#[derive(Clone)]
pub struct KeyChainGroup {
    pub basic: BasicChain,
    pub hd_chains: Vec<KeyChain>,
    pub married: Option<MarriedKeyChain>,
    pub crypter: Option<KeyCrypter>,
}

impl Default for KeyChainGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyChainGroup {
    pub fn new() -> Self {
        Self { basic: BasicChain::new(), hd_chains: Vec::new(), married: None, crypter: None }
    }

    fn active_chain(&self) -> Option<&KeyChain> {
        if let Some(married) = &self.married {
            Some(&married.local)
        } else {
            self.hd_chains.last()
        }
    }

    fn active_chain_mut(&mut self) -> Option<&mut KeyChain> {
        if let Some(married) = &mut self.married {
            Some(&mut married.local)
        } else {
            self.hd_chains.last_mut()
        }
    }

    /// Imports a non-deterministic key. Rejects an encryption-state
    /// mismatch against the group's current encryption status.
    pub fn import_key(&mut self, key: SingleKey) -> Result<()> {
        let group_encrypted = self.crypter.is_some();
        if key.is_encrypted() != group_encrypted {
            return Err(WalletError::Core(CoreError::MismatchedEncrypter));
        }
        self.basic.import(key)
    }

    /// Consults the basic chain first, then each HD chain from newest to
    /// oldest.
    pub fn find_key_from_pubhash(&self, hash: &[u8; 20]) -> Option<&SingleKey> {
        if let Some(k) = self.basic.find_by_hash(hash) {
            return Some(k);
        }
        for chain in self.hd_chains.iter().rev() {
            for (_, dk) in chain.arena.iter() {
                if &dk.pubkey_hash() == hash {
                    return Some(&dk.single);
                }
            }
        }
        None
    }

    pub fn find_key_from_pubkey(&self, pubkey: &[u8]) -> Option<&SingleKey> {
        if let Some(k) = self.basic.find_by_pubkey(pubkey) {
            return Some(k);
        }
        for chain in self.hd_chains.iter().rev() {
            for (_, dk) in chain.arena.iter() {
                if dk.public_key_bytes() == pubkey {
                    return Some(&dk.single);
                }
            }
        }
        None
    }

    /// Marks the key owning `pubkey` as used across every chain that could
    /// hold it, extending that chain's lookahead.
    pub fn mark_pubkey_used(&mut self, pubkey: &[u8]) -> Result<()> {
        for chain in &mut self.hd_chains {
            chain.mark_pubkey_used(pubkey)?;
        }
        Ok(())
    }

    pub fn mark_pubkey_hash_used(&mut self, hash: &[u8; 20]) -> Result<()> {
        for chain in &mut self.hd_chains {
            chain.mark_pubkey_hash_used(hash)?;
        }
        if let Some(married) = &mut self.married {
            married.mark_script_hash_used(hash);
        }
        Ok(())
    }

    /// Current address for `purpose`: for a plain active chain, the
    /// address of its current key; for a married group, sourced from the
    /// parallel P2SH map instead.
    pub fn current_address(&mut self, network: Network, purpose: Purpose) -> Result<String> {
        if let Some(married) = &mut self.married {
            let hash = match married.current_script_hash() {
                Some(hash) => hash,
                None => married.fresh_output_script(purpose)?.1,
            };
            return Ok(wallet_core::ecc::encode_p2sh_address(&hash, network));
        }

        let chain = self.active_chain_mut().ok_or(WalletError::DeterministicUpgradeRequired)?;
        let key_id = chain.get_key(purpose)?;
        Ok(chain.arena.get(key_id).address(network))
    }

    /// Transactional encrypt: builds new basic + HD chains first; the
    /// group is left unchanged if any step fails.
    pub fn encrypt(&mut self, passphrase: &str) -> Result<()> {
        if self.crypter.is_some() {
            return Err(WalletError::Core(CoreError::AlreadyEncrypted));
        }
        if self.basic.is_empty() && self.hd_chains.is_empty() {
            return Err(WalletError::InconsistentWallet("cannot encrypt an empty key chain group".into()));
        }

        let crypter = KeyCrypter::generate();
        let derived = crypter.derive_key(passphrase)?;

        let mut new_basic = BasicChain::new();
        for (_, key) in self.basic.iter() {
            let encrypted = key.encrypt(&crypter, &derived)?;
            new_basic.import(encrypted)?;
        }

        let mut new_hd_chains = Vec::with_capacity(self.hd_chains.len());
        for chain in &self.hd_chains {
            new_hd_chains.push(chain.encrypt(&crypter, &derived)?);
        }

        self.basic = new_basic;
        self.hd_chains = new_hd_chains;
        self.crypter = Some(crypter);
        Ok(())
    }

    /// Checks `passphrase` by decrypting one canary key. Never reveals the
    /// recovered scalar.
    pub fn check_password(&self, passphrase: &str) -> bool {
        let Some(crypter) = &self.crypter else { return false };
        let Ok(derived) = crypter.derive_key(passphrase) else { return false };

        if let Some((_, canary)) = self.basic.iter().next() {
            return canary.decrypt(crypter, &derived).is_ok();
        }
        for chain in &self.hd_chains {
            if let Some((_, dk)) = chain.arena.iter().find(|(_, dk)| dk.single.is_encrypted()) {
                return dk.single.decrypt(crypter, &derived).is_ok();
            }
        }
        false
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypter.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SingleKey;

    #[test]
    fn import_dedupes_by_pubkey() {
        let mut group = KeyChainGroup::new();
        let key = SingleKey::generate(0);
        group.import_key(key.clone()).unwrap();
        group.import_key(key).unwrap();
        assert_eq!(group.basic.len(), 1);
    }

    #[test]
    fn empty_group_refuses_encryption() {
        let mut group = KeyChainGroup::new();
        assert!(group.encrypt("secret").is_err());
    }

    #[test]
    fn check_password_distinguishes_correct_from_wrong() {
        let mut group = KeyChainGroup::new();
        group.hd_chains.push(KeyChain::from_seed(&[4u8; 32], 10, 5, 0).unwrap());
        group.encrypt("right password").unwrap();
        assert!(group.check_password("right password"));
        assert!(!group.check_password("wrong password"));
    }

    #[test]
    fn find_key_from_pubhash_checks_hd_chains_newest_first() {
        let mut group = KeyChainGroup::new();
        group.hd_chains.push(KeyChain::from_seed(&[1u8; 32], 10, 5, 0).unwrap());
        group.hd_chains.push(KeyChain::from_seed(&[2u8; 32], 10, 5, 0).unwrap());
        let newest_key_id = group.hd_chains[1].fresh_key(Purpose::Receive).unwrap();
        let hash = group.hd_chains[1].arena.get(newest_key_id).pubkey_hash();
        assert!(group.find_key_from_pubhash(&hash).is_some());
    }
}
