//! Single keys and arena-addressed deterministic keys.
//!
//! Deterministic keys point at their parent only through the arena index
//! (a plain lookup), never through an owning reference, so the derivation
//! tree never forms an ownership cycle — see spec.md Design Notes §9.

use wallet_core::config::Network;
use wallet_core::crypter::{EncryptedData, KeyCrypter};
use wallet_core::ecc::KeyPair;
use wallet_core::hd::extended_key::{ChildNumber, ExtendedKey};
use wallet_core::Error as CoreError;

use crate::error::{Result, WalletError};

/// Stable index of a [`DeterministicKey`] inside its owning [`KeyArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub usize);

/// A key outside any HD chain: either freshly generated/imported with a
/// private scalar, watching-only, or encrypted at rest.
///
/// Invariant: `keypair.secret` and `encrypted` are never both set, and a
/// watching-only key has neither (spec.md §3).
#[derive(Clone)]
pub struct SingleKey {
    pub keypair: KeyPair,
    /// Seconds since epoch; lets block rescans skip keys created after a
    /// given checkpoint.
    pub creation_time: u64,
    pub encrypted: Option<EncryptedData>,
    /// Identifies which [`KeyCrypter`] wrapped this key, so a chain never
    /// mixes ciphertext from two different crypters.
    pub crypter_id: Option<u64>,
}

impl SingleKey {
    pub fn generate(creation_time: u64) -> Self {
        Self { keypair: KeyPair::generate(), creation_time, encrypted: None, crypter_id: None }
    }

    pub fn watching(keypair: KeyPair, creation_time: u64) -> Self {
        let mut k = keypair;
        k.secret = None;
        Self { keypair: k, creation_time, encrypted: None, crypter_id: None }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted.is_some()
    }

    pub fn is_watching_only(&self) -> bool {
        self.keypair.secret.is_none() && self.encrypted.is_none()
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        self.keypair.pubkey_hash()
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.keypair.public_key_bytes()
    }

    pub fn address(&self, network: Network) -> String {
        self.keypair.address(network)
    }

    /// Wraps the private scalar with `crypter`, returning a new encrypted
    /// key. Fails if already encrypted or watching-only.
    pub fn encrypt(&self, crypter: &KeyCrypter, derived: &[u8; 32]) -> Result<Self> {
        if self.encrypted.is_some() {
            return Err(WalletError::Core(CoreError::AlreadyEncrypted));
        }
        let secret = self.keypair.secret.ok_or(WalletError::Core(CoreError::KeyIsWatchingOnly))?;
        let encrypted = crypter.encrypt(&secret.secret_bytes(), derived);
        Ok(Self {
            keypair: KeyPair::watching(self.keypair.public, self.keypair.compressed),
            creation_time: self.creation_time,
            encrypted: Some(encrypted),
            crypter_id: Some(crypter.id),
        })
    }

    /// Unwraps the private scalar with `crypter`, returning a new plaintext
    /// key. Fails with `WrongPassphrase` if the derived key cannot decrypt
    /// this key's ciphertext.
    pub fn decrypt(&self, crypter: &KeyCrypter, derived: &[u8; 32]) -> Result<Self> {
        let data = self.encrypted.as_ref().ok_or(WalletError::Core(CoreError::NotEncrypted))?;
        let plaintext = crypter.decrypt(data, derived)?;
        let secret = secp256k1::SecretKey::from_slice(&plaintext)
            .map_err(|_| WalletError::Core(CoreError::WrongPassphrase))?;
        Ok(Self {
            keypair: KeyPair::from_secret(secret, self.keypair.compressed),
            creation_time: self.creation_time,
            encrypted: None,
            crypter_id: None,
        })
    }
}

/// An HD key: a [`SingleKey`]'s material plus chain position. Parent
/// linkage is a [`KeyId`] into the owning arena, not a reference — the
/// `path` is this key's real identity.
#[derive(Clone)]
pub struct DeterministicKey {
    pub single: SingleKey,
    pub parent: Option<KeyId>,
    pub chain_code: [u8; 32],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: ChildNumber,
    pub path: Vec<ChildNumber>,
    /// Set once this key (or a later one on the same branch) has been seen
    /// paying or being spent by a transaction — drives lookahead advance.
    pub used: bool,
}

impl DeterministicKey {
    pub fn from_extended(ext: &ExtendedKey, parent: Option<KeyId>, creation_time: u64) -> Self {
        let compressed = true;
        let keypair = match ext.secret {
            Some(secret) => KeyPair::from_secret(secret, compressed),
            None => KeyPair::watching(ext.public, compressed),
        };
        Self {
            single: SingleKey { keypair, creation_time, encrypted: None, crypter_id: None },
            parent,
            chain_code: ext.chain_code,
            depth: ext.depth,
            parent_fingerprint: ext.parent_fingerprint,
            child_number: ext.child_number,
            path: ext.path.clone(),
            used: false,
        }
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        self.single.pubkey_hash()
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.single.public_key_bytes()
    }

    pub fn address(&self, network: Network) -> String {
        self.single.address(network)
    }
}

/// Arena of [`DeterministicKey`]s addressed by stable [`KeyId`], with a
/// secondary index from derivation path to id so a key is only ever
/// derived once (spec.md §4.4: "Derivation is memoised per path and never
/// recomputed").
#[derive(Default, Clone)]
pub struct KeyArena {
    keys: Vec<DeterministicKey>,
    by_path: std::collections::HashMap<Vec<ChildNumber>, KeyId>,
}

impl KeyArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: DeterministicKey) -> KeyId {
        let path = key.path.clone();
        let id = KeyId(self.keys.len());
        self.keys.push(key);
        self.by_path.insert(path, id);
        id
    }

    pub fn get(&self, id: KeyId) -> &DeterministicKey {
        &self.keys[id.0]
    }

    pub fn get_mut(&mut self, id: KeyId) -> &mut DeterministicKey {
        &mut self.keys[id.0]
    }

    pub fn id_for_path(&self, path: &[ChildNumber]) -> Option<KeyId> {
        self.by_path.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, &DeterministicKey)> {
        self.keys.iter().enumerate().map(|(i, k)| (KeyId(i), k))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeterministicKey> {
        self.keys.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_generate_is_not_watching_only() {
        let k = SingleKey::generate(0);
        assert!(!k.is_watching_only());
        assert!(!k.is_encrypted());
    }

    #[test]
    fn arena_memoises_by_path() {
        let mut arena = KeyArena::new();
        let seed = wallet_core::hd::extended_key::ExtendedKey::master(&[1u8; 16]).unwrap();
        let dk = DeterministicKey::from_extended(&seed, None, 0);
        let id = arena.insert(dk);
        assert_eq!(arena.id_for_path(&[]), Some(id));
    }
}
