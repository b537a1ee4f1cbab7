//! BIP32 master/child derivation and extended-key (xprv/xpub) serialisation.

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha2::Sha512;

use crate::config::Network;
use crate::ecc::hash160;
use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

const HARDENED_BIT: u32 = 0x8000_0000;
/// secp256k1 group order, needed to detect an invalid derived scalar.
const CURVE_ORDER: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE,
    0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];
const MAX_DERIVATION_ATTEMPTS: u32 = 100;
const MIN_SEED_LEN: usize = 9;

/// A 32-bit BIP32 child index. The high bit marks a hardened child; the low
/// 31 bits are the index. Ordered by the full unsigned value, which is the
/// same order used when listing a parent's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildNumber(pub u32);

impl ChildNumber {
    pub fn normal(index: u32) -> Self {
        debug_assert!(index < HARDENED_BIT);
        Self(index)
    }

    pub fn hardened(index: u32) -> Self {
        debug_assert!(index < HARDENED_BIT);
        Self(index | HARDENED_BIT)
    }

    pub fn is_hardened(self) -> bool {
        self.0 & HARDENED_BIT != 0
    }

    pub fn index(self) -> u32 {
        self.0 & !HARDENED_BIT
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

/// A derivation path: the ordered sequence of [`ChildNumber`]s from the
/// root, e.g. `m/0'/1` for receive key 1 under a hardened account branch.
pub type DerivationPath = Vec<ChildNumber>;

/// A BIP32 deterministic key: a private or public point plus chain code,
/// depth, parent fingerprint and the path it was derived along.
///
/// Parent/child relationships are *not* pointers — the `path` is the
/// logical identity of a key and a parent is always re-derived or looked up
/// by its (shorter) path, per spec.md Design Notes §9. This struct itself
/// carries only the fingerprint of its immediate parent, not a reference.
#[derive(Clone)]
pub struct ExtendedKey {
    pub secret: Option<SecretKey>,
    pub public: PublicKey,
    pub chain_code: [u8; 32],
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: ChildNumber,
    pub path: DerivationPath,
}

impl ExtendedKey {
    /// Derives the master key from a seed: `I = HMAC-SHA512("Bitcoin seed", seed)`.
    /// Rejects seeds shorter than the 9-byte brute-force floor.
    pub fn master(seed: &[u8]) -> Result<Self> {
        if seed.len() < MIN_SEED_LEN {
            return Err(Error::SeedTooShort(seed.len()));
        }
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed").expect("hmac accepts any key length");
        mac.update(seed);
        let i = mac.finalize().into_bytes();
        let (il, ir) = i.split_at(32);

        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(il).map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(ir);

        Ok(Self {
            secret: Some(secret),
            public,
            chain_code,
            depth: 0,
            parent_fingerprint: [0u8; 4],
            child_number: ChildNumber(0),
            path: Vec::new(),
        })
    }

    /// First 4 bytes of HASH160 of this key's public point — used as the
    /// parent fingerprint stamped into any direct child.
    pub fn fingerprint(&self) -> [u8; 4] {
        let h = hash160(&self.public.serialize());
        [h[0], h[1], h[2], h[3]]
    }

    fn serialize_compressed_public(&self) -> [u8; 33] {
        self.public.serialize()
    }

    /// Derives the child at `index`, retrying the next index (up to
    /// [`MAX_DERIVATION_ATTEMPTS`]) whenever the candidate scalar is zero or
    /// `>= n`, per spec.md §4.3. Returns the child actually produced, whose
    /// `child_number` may therefore differ from the one requested if a
    /// retry occurred.
    pub fn derive_child(&self, index: ChildNumber) -> Result<Self> {
        let secp = Secp256k1::new();
        let mut idx = index.0;
        let hardened = index.is_hardened();

        for attempt in 0..MAX_DERIVATION_ATTEMPTS {
            let child_index = if hardened { idx | HARDENED_BIT } else { idx & !HARDENED_BIT };

            let mut mac = HmacSha512::new_from_slice(&self.chain_code).expect("hmac accepts any key length");
            if hardened {
                let secret = self
                    .secret
                    .ok_or_else(|| Error::InvalidExtendedKey("hardened derivation requires private key".into()))?;
                mac.update(&[0x00]);
                mac.update(&secret.secret_bytes());
            } else {
                mac.update(&self.serialize_compressed_public());
            }
            mac.update(&child_index.to_be_bytes());
            let i = mac.finalize().into_bytes();
            let (il, ir) = i.split_at(32);

            if il.as_ref() >= CURVE_ORDER.as_slice() {
                idx = idx.wrapping_add(1);
                continue;
            }

            let tweak = match SecretKey::from_slice(il) {
                Ok(t) => t,
                Err(_) => {
                    idx = idx.wrapping_add(1);
                    continue;
                }
            };

            let child_result = match self.secret {
                Some(parent_secret) => parent_secret.add_tweak(&tweak.into()).map(|s| (Some(s), None)),
                None => self
                    .public
                    .add_exp_tweak(&secp, &tweak.into())
                    .map(|p| (None, Some(p))),
            };

            let (child_secret, child_public_override) = match child_result {
                Ok(v) => v,
                Err(_) => {
                    idx = idx.wrapping_add(1);
                    continue;
                }
            };

            let child_public = match child_public_override {
                Some(p) => p,
                None => PublicKey::from_secret_key(&secp, &child_secret.expect("secret branch set")),
            };

            let mut chain_code = [0u8; 32];
            chain_code.copy_from_slice(ir);

            let mut path = self.path.clone();
            let final_child_number = ChildNumber(child_index);
            path.push(final_child_number);

            let _ = attempt;
            return Ok(Self {
                secret: child_secret,
                public: child_public,
                chain_code,
                depth: self.depth.wrapping_add(1),
                parent_fingerprint: self.fingerprint(),
                child_number: final_child_number,
                path,
            });
        }

        Err(Error::DerivationExhausted(MAX_DERIVATION_ATTEMPTS))
    }

    /// Derives along a full path from this key (treated as the root of the
    /// path for fingerprint/depth bookkeeping).
    pub fn derive_path(&self, path: &[ChildNumber]) -> Result<Self> {
        let mut current = self.clone();
        for &child in path {
            current = current.derive_child(child)?;
        }
        Ok(current)
    }

    /// A public-only view of this key: drops the private scalar.
    pub fn neuter(&self) -> Self {
        Self { secret: None, ..self.clone() }
    }

    /// Serialises this key as a BIP32 extended private key (xprv), Base58Check
    /// encoded. Fails if this key has no private scalar.
    pub fn to_xprv_string(&self, network: Network) -> Result<String> {
        let secret = self.secret.ok_or(Error::KeyIsWatchingOnly)?;
        let mut payload = Vec::with_capacity(78);
        payload.extend_from_slice(&network.xprv_version());
        payload.push(self.depth);
        payload.extend_from_slice(&self.parent_fingerprint);
        payload.extend_from_slice(&self.child_number.to_be_bytes());
        payload.extend_from_slice(&self.chain_code);
        payload.push(0x00);
        payload.extend_from_slice(&secret.secret_bytes());
        Ok(bs58::encode(payload).with_check().into_string())
    }

    /// Serialises this key as a BIP32 extended public key (xpub), Base58Check
    /// encoded.
    pub fn to_xpub_string(&self, network: Network) -> String {
        let mut payload = Vec::with_capacity(78);
        payload.extend_from_slice(&network.xpub_version());
        payload.push(self.depth);
        payload.extend_from_slice(&self.parent_fingerprint);
        payload.extend_from_slice(&self.child_number.to_be_bytes());
        payload.extend_from_slice(&self.chain_code);
        payload.extend_from_slice(&self.serialize_compressed_public());
        bs58::encode(payload).with_check().into_string()
    }

    fn from_payload(payload: &[u8], secret: Option<SecretKey>, public: Option<PublicKey>) -> Result<Self> {
        if payload.len() != 78 {
            return Err(Error::InvalidExtendedKey(format!("expected 78-byte payload, got {}", payload.len())));
        }
        let depth = payload[4];
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&payload[5..9]);
        let child_number = ChildNumber(u32::from_be_bytes(payload[9..13].try_into().expect("4 bytes")));
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);

        let public = match public {
            Some(p) => p,
            None => {
                let secp = Secp256k1::new();
                PublicKey::from_secret_key(&secp, &secret.expect("secret present for xprv"))
            }
        };

        Ok(Self { secret, public, chain_code, depth, parent_fingerprint, child_number, path: Vec::new() })
    }

    /// Parses a Base58Check xprv string produced by [`Self::to_xprv_string`].
    /// The path is not recoverable from the wire form; the result's `path`
    /// is empty, matching how [`Self::master`] starts a fresh tree.
    pub fn from_xprv_string(s: &str) -> Result<Self> {
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;
        if payload[45] != 0x00 {
            return Err(Error::InvalidExtendedKey("xprv padding byte must be 0x00".into()));
        }
        let secret = SecretKey::from_slice(&payload[46..78]).map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;
        Self::from_payload(&payload, Some(secret), None)
    }

    /// Parses a Base58Check xpub string produced by [`Self::to_xpub_string`].
    pub fn from_xpub_string(s: &str) -> Result<Self> {
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;
        let public = PublicKey::from_slice(&payload[45..78]).map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;
        Self::from_payload(&payload, None, Some(public))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bip32_test_vector_1_master() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedKey::master(&seed).unwrap();
        let xprv = master.to_xprv_string(Network::Mainnet).unwrap();
        assert_eq!(
            xprv,
            "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
        );
    }

    #[test]
    fn short_seed_rejected() {
        assert!(matches!(ExtendedKey::master(&[0u8; 8]), Err(Error::SeedTooShort(8))));
        assert!(ExtendedKey::master(&[0u8; 9]).is_ok());
    }

    #[test]
    fn hardened_and_normal_children_differ() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedKey::master(&seed).unwrap();
        let hardened = master.derive_child(ChildNumber::hardened(0)).unwrap();
        let normal = master.derive_child(ChildNumber::normal(0)).unwrap();
        assert_ne!(hardened.public, normal.public);
        assert!(hardened.child_number.is_hardened());
        assert!(!normal.child_number.is_hardened());
    }

    #[test]
    fn neuter_drops_private_key() {
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = ExtendedKey::master(&seed).unwrap();
        let pub_only = master.neuter();
        assert!(pub_only.secret.is_none());
        assert_eq!(pub_only.public, master.public);
    }
}
