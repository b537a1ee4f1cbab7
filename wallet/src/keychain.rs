//! Key Chain: a lazy, gap-limit ("lookahead") tree of keys derived from one
//! seed along two branches, external (receive) and internal (change).

use std::collections::HashMap;

use wallet_core::crypter::KeyCrypter;
use wallet_core::hd::extended_key::{ChildNumber, ExtendedKey};
use wallet_core::script::ScriptPubKey;
use wallet_core::Error as CoreError;

use crate::error::{Result, WalletError};
use crate::key::{DeterministicKey, KeyArena, KeyId};

/// Which branch a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Receive,
    Change,
}

impl Purpose {
    fn branch_child(self) -> ChildNumber {
        match self {
            Purpose::Receive => ChildNumber::hardened(0),
            Purpose::Change => ChildNumber::hardened(1),
        }
    }
}

/// Per-branch bookkeeping: how many keys have been handed out, how many are
/// precomputed, and which key is "current" (the most recently issued key,
/// until it is marked used).
#[derive(Clone)]
struct Branch {
    root_path: Vec<ChildNumber>,
    issued: u32,
    precomputed: u32,
    current: Option<KeyId>,
}

/// One seed-rooted tree of receive/change keys.
#[derive(Clone)]
pub struct KeyChain {
    pub arena: KeyArena,
    external: Branch,
    internal: Branch,
    lookahead_size: u32,
    lookahead_threshold: u32,
    /// `Some` once every key in the arena has been wrapped by a
    /// [`KeyCrypter`] with this id; mixing two crypters in one chain is
    /// rejected (spec.md §4.2 `MismatchedEncrypter`).
    pub crypter_id: Option<u64>,
    creation_time: u64,
}

impl KeyChain {
    /// Builds a fresh chain from a 64-byte BIP39 seed and eagerly
    /// precomputes `lookahead_size` keys on each branch.
    pub fn from_seed(seed: &[u8], lookahead_size: u32, lookahead_threshold: u32, creation_time: u64) -> Result<Self> {
        let master = ExtendedKey::master(seed)?;
        Self::from_master(&master, lookahead_size, lookahead_threshold, creation_time)
    }

    /// Builds a fresh chain rooted at an already-derived extended key
    /// (public-only for a watching chain, private for a spending one).
    pub fn from_master(
        master: &ExtendedKey,
        lookahead_size: u32,
        lookahead_threshold: u32,
        creation_time: u64,
    ) -> Result<Self> {
        let mut arena = KeyArena::new();

        let external_root = master.derive_child(Purpose::Receive.branch_child())?;
        let internal_root = master.derive_child(Purpose::Change.branch_child())?;
        let root_dk = DeterministicKey::from_extended(master, None, creation_time);
        let root_id = arena.insert(root_dk);
        let external_dk = DeterministicKey::from_extended(&external_root, Some(root_id), creation_time);
        let external_root_id = arena.insert(external_dk);
        let internal_dk = DeterministicKey::from_extended(&internal_root, Some(root_id), creation_time);
        let internal_root_id = arena.insert(internal_dk);
        let _ = (external_root_id, internal_root_id);

        let mut chain = Self {
            arena,
            external: Branch { root_path: external_root.path.clone(), issued: 0, precomputed: 0, current: None },
            internal: Branch { root_path: internal_root.path.clone(), issued: 0, precomputed: 0, current: None },
            lookahead_size,
            lookahead_threshold,
            crypter_id: None,
            creation_time,
        };

        chain.derive_branch(Purpose::Receive, &external_root, lookahead_size)?;
        chain.derive_branch(Purpose::Change, &internal_root, lookahead_size)?;
        chain.external.precomputed = lookahead_size;
        chain.internal.precomputed = lookahead_size;
        Ok(chain)
    }

    fn branch(&self, purpose: Purpose) -> &Branch {
        match purpose {
            Purpose::Receive => &self.external,
            Purpose::Change => &self.internal,
        }
    }

    fn branch_mut(&mut self, purpose: Purpose) -> &mut Branch {
        match purpose {
            Purpose::Receive => &mut self.external,
            Purpose::Change => &mut self.internal,
        }
    }

    fn branch_root_extended(&self, purpose: Purpose) -> Result<ExtendedKey> {
        let branch = self.branch(purpose);
        let root_id = self
            .arena
            .id_for_path(&branch.root_path)
            .ok_or_else(|| WalletError::InconsistentWallet("branch root missing from arena".into()))?;
        Ok(self.to_extended(root_id))
    }

    fn to_extended(&self, id: KeyId) -> ExtendedKey {
        let dk = self.arena.get(id);
        ExtendedKey {
            secret: dk.single.keypair.secret,
            public: dk.single.keypair.public,
            chain_code: dk.chain_code,
            depth: dk.depth,
            parent_fingerprint: dk.parent_fingerprint,
            child_number: dk.child_number,
            path: dk.path.clone(),
        }
    }

    /// Derives indices `[arena-known .. up_to)` under `branch_root` and
    /// inserts them into the arena. Memoised: an index whose path already
    /// exists in the arena is skipped, per spec.md's "never recomputed".
    fn derive_branch(&mut self, purpose: Purpose, branch_root: &ExtendedKey, up_to: u32) -> Result<()> {
        let parent_path = branch_root.path.clone();
        let parent_id = self
            .arena
            .id_for_path(&parent_path)
            .expect("branch root inserted by from_master before derive_branch runs");
        for i in 0..up_to {
            let mut path = parent_path.clone();
            path.push(ChildNumber::normal(i));
            if self.arena.id_for_path(&path).is_some() {
                continue;
            }
            let child = branch_root.derive_child(ChildNumber::normal(i))?;
            let dk = DeterministicKey::from_extended(&child, Some(parent_id), self.creation_time);
            self.arena.insert(dk);
        }
        Ok(())
    }

    /// Extends precomputation on `purpose` up to `issued + lookahead_size`
    /// whenever the remaining buffer has fallen below the threshold.
    fn ensure_lookahead(&mut self, purpose: Purpose) -> Result<()> {
        let branch_root = self.branch_root_extended(purpose)?;
        let (issued, precomputed) = {
            let b = self.branch(purpose);
            (b.issued, b.precomputed)
        };
        if precomputed.saturating_sub(issued) < self.lookahead_threshold {
            let up_to = issued + self.lookahead_size;
            self.derive_branch(purpose, &branch_root, up_to)?;
            self.branch_mut(purpose).precomputed = up_to.max(precomputed);
        }
        Ok(())
    }

    fn key_id_at(&self, purpose: Purpose, index: u32) -> Option<KeyId> {
        let mut path = self.branch(purpose).root_path.clone();
        path.push(ChildNumber::normal(index));
        self.arena.id_for_path(&path)
    }

    /// Returns the key at index `issued`, then increments `issued`, then
    /// extends lookahead if the precomputed buffer would fall below
    /// threshold. Always issues a brand new key.
    pub fn fresh_key(&mut self, purpose: Purpose) -> Result<KeyId> {
        self.ensure_lookahead(purpose)?;
        let index = self.branch(purpose).issued;
        let id = self.key_id_at(purpose, index).ok_or_else(|| {
            WalletError::InconsistentWallet(format!("lookahead buffer exhausted at index {index}"))
        })?;
        self.branch_mut(purpose).issued = index + 1;
        self.branch_mut(purpose).current = Some(id);
        self.ensure_lookahead(purpose)?;
        Ok(id)
    }

    /// Returns the current key for `purpose`, advancing only when the
    /// previous current key has been marked used.
    pub fn get_key(&mut self, purpose: Purpose) -> Result<KeyId> {
        let needs_fresh = match self.branch(purpose).current {
            None => true,
            Some(id) => self.arena.get(id).used,
        };
        if needs_fresh {
            self.fresh_key(purpose)
        } else {
            Ok(self.branch(purpose).current.expect("checked above"))
        }
    }

    /// Returns exactly `n` keys for `purpose`: the first `n` already-issued
    /// keys if at least that many exist, else all issued keys plus freshly
    /// issued ones until the total reaches `n` (spec.md §9 Open Question a).
    pub fn get_keys(&mut self, purpose: Purpose, n: u32) -> Result<Vec<KeyId>> {
        let mut ids = Vec::with_capacity(n as usize);
        let already_issued = self.branch(purpose).issued;
        for i in 0..already_issued.min(n) {
            if let Some(id) = self.key_id_at(purpose, i) {
                ids.push(id);
            }
        }
        while ids.len() < n as usize {
            ids.push(self.fresh_key(purpose)?);
        }
        Ok(ids)
    }

    /// Locates `pubkey` among the precomputed buffer; if found, raises
    /// `issued` to one past it (never lowering it) and extends lookahead.
    pub fn mark_pubkey_used(&mut self, pubkey: &[u8]) -> Result<bool> {
        self.mark_used_by(|dk| dk.public_key_bytes() == pubkey)
    }

    /// As [`Self::mark_pubkey_used`] but matching on the 20-byte HASH160.
    pub fn mark_pubkey_hash_used(&mut self, hash: &[u8; 20]) -> Result<bool> {
        self.mark_used_by(|dk| &dk.pubkey_hash() == hash)
    }

    fn mark_used_by(&mut self, matcher: impl Fn(&DeterministicKey) -> bool) -> Result<bool> {
        for purpose in [Purpose::Receive, Purpose::Change] {
            let precomputed = self.branch(purpose).precomputed;
            for index in 0..precomputed {
                let Some(id) = self.key_id_at(purpose, index) else { continue };
                if matcher(self.arena.get(id)) {
                    self.arena.get_mut(id).used = true;
                    let branch = self.branch_mut(purpose);
                    if branch.issued < index + 1 {
                        branch.issued = index + 1;
                    }
                    self.ensure_lookahead(purpose)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Returns the arena keys matching the given derivation paths, if
    /// already derived.
    pub fn get_keys_by_path<'a>(&'a self, paths: &[Vec<ChildNumber>]) -> Vec<&'a DeterministicKey> {
        paths.iter().filter_map(|p| self.arena.id_for_path(p)).map(|id| self.arena.get(id)).collect()
    }

    /// Encrypts every scalar in this chain with `crypter`, returning a new
    /// chain. Fails if already encrypted.
    pub fn encrypt(&self, crypter: &KeyCrypter, derived: &[u8; 32]) -> Result<Self> {
        if self.crypter_id.is_some() {
            return Err(WalletError::Core(CoreError::AlreadyEncrypted));
        }
        let mut out = self.clone();
        out.crypter_id = Some(crypter.id);
        let ids: Vec<KeyId> = out.arena.iter().map(|(id, _)| id).collect();
        for id in ids {
            let dk = out.arena.get(id);
            if dk.single.keypair.secret.is_none() {
                continue;
            }
            let encrypted_single = dk.single.encrypt(crypter, derived)?;
            out.arena.get_mut(id).single = encrypted_single;
        }
        Ok(out)
    }

    /// Decrypts every scalar with `crypter`, returning a new plaintext
    /// chain. Fails with `WrongPassphrase` if any key's known canary
    /// ciphertext cannot be decrypted (checked via the first external key).
    pub fn decrypt(&self, crypter: &KeyCrypter, derived: &[u8; 32]) -> Result<Self> {
        if self.crypter_id != Some(crypter.id) {
            return Err(WalletError::Core(CoreError::MismatchedEncrypter));
        }
        let mut out = self.clone();
        out.crypter_id = None;
        let ids: Vec<KeyId> = out.arena.iter().map(|(id, _)| id).collect();
        for id in ids {
            let dk = out.arena.get(id);
            if dk.single.encrypted.is_none() {
                continue;
            }
            let decrypted_single = dk.single.decrypt(crypter, derived)?;
            out.arena.get_mut(id).single = decrypted_single;
        }
        Ok(out)
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypter_id.is_some()
    }

    /// How many keys have been issued on `purpose`'s branch so far.
    pub fn issued(&self, purpose: Purpose) -> u32 {
        self.branch(purpose).issued
    }

    pub fn lookahead_params(&self) -> (u32, u32) {
        (self.lookahead_size, self.lookahead_threshold)
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// The root extended key this chain was built from (depth 0, empty
    /// path), as stored in the arena.
    pub fn root_extended(&self) -> ExtendedKey {
        let root_id = self.arena.id_for_path(&[]).expect("root always inserted by from_master");
        self.to_extended(root_id)
    }

    /// Re-establishes `issued` on `purpose`'s branch after rebuilding a
    /// chain from its root key, extending lookahead to cover it. Never
    /// lowers an already-set `issued`.
    pub fn restore_issued(&mut self, purpose: Purpose, issued: u32) -> Result<()> {
        if issued > self.branch(purpose).precomputed {
            self.derive_branch(purpose, &self.branch_root_extended(purpose)?, issued)?;
            self.branch_mut(purpose).precomputed = issued;
        }
        let branch = self.branch_mut(purpose);
        branch.issued = branch.issued.max(issued);
        self.ensure_lookahead(purpose)
    }
}

/// A cosigner's watching-only account chain, used by [`MarriedKeyChain`] to
/// derive the remote half of each output script at a given index.
#[derive(Clone)]
pub struct FollowingChain {
    pub root: ExtendedKey,
}

impl FollowingChain {
    pub fn key_at(&self, purpose: Purpose, index: u32) -> Result<ExtendedKey> {
        let branch_root = self.root.derive_child(purpose.branch_child())?;
        branch_root.derive_child(ChildNumber::normal(index))
    }
}

/// Cached redeem-script data for one issued P2SH address.
#[derive(Clone)]
pub struct RedeemData {
    pub redeem_script: Vec<u8>,
    pub local_signing_key: KeyId,
}

/// Multisig-P2SH variant: the local chain plus an ordered set of watching
/// following chains (remote cosigners). Each issued "address" is the P2SH
/// of an m-of-n script combining the local key with one key per cosigner at
/// the same index (spec.md glossary "Married wallet").
#[derive(Clone)]
pub struct MarriedKeyChain {
    pub local: KeyChain,
    pub following: Vec<FollowingChain>,
    pub threshold: usize,
    redeem_by_script_hash: HashMap<[u8; 20], RedeemData>,
    current_p2sh: Option<[u8; 20]>,
}

impl MarriedKeyChain {
    pub fn new(local: KeyChain, following: Vec<FollowingChain>, threshold: usize) -> Self {
        Self { local, following, threshold, redeem_by_script_hash: HashMap::new(), current_p2sh: None }
    }

    /// Builds the m-of-n redeem script combining the local key at `index`
    /// with each cosigner's key at the same index, public keys ordered
    /// lexicographically (BIP11/BIP67-style deterministic ordering), wraps
    /// it in P2SH and caches the mapping.
    pub fn fresh_output_script(&mut self, purpose: Purpose) -> Result<(Vec<u8>, [u8; 20])> {
        let local_id = self.local.fresh_key(purpose)?;
        let local_pubkey = self.local.arena.get(local_id).public_key_bytes();

        let index = match purpose {
            Purpose::Receive => self.local.external.issued - 1,
            Purpose::Change => self.local.internal.issued - 1,
        };

        let mut pubkeys: Vec<Vec<u8>> = vec![local_pubkey];
        for cosigner in &self.following {
            let key = cosigner.key_at(purpose, index)?;
            pubkeys.push(key.public.serialize().to_vec());
        }
        pubkeys.sort();

        let redeem_script = build_multisig_redeem_script(self.threshold, &pubkeys);
        let script_hash = wallet_core::ecc::hash160(&redeem_script);
        let p2sh = ScriptPubKey::p2sh_script(&script_hash);
        let mut hash20 = [0u8; 20];
        hash20.copy_from_slice(&script_hash);

        self.redeem_by_script_hash
            .insert(hash20, RedeemData { redeem_script: redeem_script.clone(), local_signing_key: local_id });
        self.current_p2sh = Some(hash20);
        Ok((p2sh, hash20))
    }

    /// Returns the redeem script and local signing key for any precomputed
    /// script hash.
    pub fn find_redeem_data_by_script_hash(&self, hash: &[u8; 20]) -> Option<&RedeemData> {
        self.redeem_by_script_hash.get(hash)
    }

    /// The married analogue of a current address: the most recently issued
    /// P2SH hash, advanced when its redeem script is marked used.
    pub fn current_script_hash(&self) -> Option<[u8; 20]> {
        self.current_p2sh
    }

    pub fn mark_script_hash_used(&mut self, hash: &[u8; 20]) {
        if let Some(data) = self.redeem_by_script_hash.get(hash) {
            let id = data.local_signing_key;
            self.local.arena.get_mut(id).used = true;
        }
        if self.current_p2sh.as_ref() == Some(hash) {
            self.current_p2sh = None;
        }
    }
}

fn build_multisig_redeem_script(threshold: usize, pubkeys: &[Vec<u8>]) -> Vec<u8> {
    const OP_1: u8 = 0x51;
    const OP_CHECKMULTISIG: u8 = 0xae;

    let mut script = Vec::new();
    script.push(OP_1 + (threshold as u8 - 1));
    for pk in pubkeys {
        script.push(pk.len() as u8);
        script.extend_from_slice(pk);
    }
    script.push(OP_1 + (pubkeys.len() as u8 - 1));
    script.push(OP_CHECKMULTISIG);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chain() -> KeyChain {
        KeyChain::from_seed(&[7u8; 32], 20, 5, 0).unwrap()
    }

    #[test]
    fn precomputed_never_falls_below_threshold() {
        let mut chain = test_chain();
        for _ in 0..10 {
            chain.fresh_key(Purpose::Receive).unwrap();
        }
        assert!(chain.external.precomputed >= chain.external.issued + chain.lookahead_threshold);
    }

    #[test]
    fn get_key_is_stable_until_marked_used() {
        let mut chain = test_chain();
        let first = chain.get_key(Purpose::Receive).unwrap();
        let second = chain.get_key(Purpose::Receive).unwrap();
        assert_eq!(first, second);
        let pubkey = chain.arena.get(first).public_key_bytes();
        chain.mark_pubkey_used(&pubkey).unwrap();
        let third = chain.get_key(Purpose::Receive).unwrap();
        assert_ne!(second, third);
    }

    #[test]
    fn mark_pubkey_hash_used_raises_issued_but_never_lowers_it() {
        let mut chain = test_chain();
        chain.fresh_key(Purpose::Receive).unwrap();
        chain.fresh_key(Purpose::Receive).unwrap();
        let issued_before = chain.external.issued;
        let third_id = chain.key_id_at(Purpose::Receive, 0).unwrap();
        let hash = chain.arena.get(third_id).pubkey_hash();
        chain.mark_pubkey_hash_used(&hash).unwrap();
        assert_eq!(chain.external.issued, issued_before);
    }

    #[test]
    fn get_keys_derives_fresh_when_fewer_issued_than_requested() {
        let mut chain = test_chain();
        let keys = chain.get_keys(Purpose::Receive, 5).unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(chain.external.issued, 5);
    }

    #[test]
    fn encrypt_then_decrypt_roundtrip() {
        let chain = test_chain();
        let crypter = KeyCrypter::generate();
        let derived = crypter.derive_key("hunter2").unwrap();
        let encrypted = chain.encrypt(&crypter, &derived).unwrap();
        assert!(encrypted.is_encrypted());
        let decrypted = encrypted.decrypt(&crypter, &derived).unwrap();
        assert!(!decrypted.is_encrypted());
        let (_, orig) = chain.arena.iter().next().unwrap();
        let (_, round) = decrypted.arena.iter().next().unwrap();
        assert_eq!(orig.public_key_bytes(), round.public_key_bytes());
    }
}
