//! Elliptic Crypto Layer.
//!
//! Wraps `secp256k1` ECDSA signing/verification with the conventions Bitcoin
//! expects: low-s normalised signatures, DER encoding with an appended
//! sighash-type byte, and Bitcoin Core's `IsCanonicalSignature` shape check.
//! Also hosts HASH160 and Base58Check address encoding, since both are pure
//! functions of key bytes with no state of their own.

use ripemd::Ripemd160;
use secp256k1::rand::rngs::OsRng;
use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::config::Network;
use crate::error::{Error, Result};

/// A secp256k1 keypair: an optional private scalar (absent for
/// watching-only material) plus its public point.
#[derive(Clone)]
pub struct KeyPair {
    pub secret: Option<SecretKey>,
    pub public: PublicKey,
    /// Whether the public key should be serialised compressed (33 bytes)
    /// or uncompressed (65 bytes). Persistent: it changes address
    /// derivation and byte-equality of the serialised key.
    pub compressed: bool,
}

impl KeyPair {
    /// Generates a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut OsRng);
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self { secret: Some(secret), public, compressed: true }
    }

    /// Reconstructs a keypair from a known secret scalar.
    pub fn from_secret(secret: SecretKey, compressed: bool) -> Self {
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self { secret: Some(secret), public, compressed }
    }

    /// A watching-only keypair: public point, no private scalar.
    pub fn watching(public: PublicKey, compressed: bool) -> Self {
        Self { secret: None, public, compressed }
    }

    /// Serialises the public key per the persistent compression flag.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        if self.compressed {
            self.public.serialize().to_vec()
        } else {
            self.public.serialize_uncompressed().to_vec()
        }
    }

    /// HASH160 of the serialised public key.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key_bytes())
    }

    /// Base58Check address derived from this key's pubkey hash.
    pub fn address(&self, network: Network) -> String {
        encode_p2pkh_address(&self.pubkey_hash(), network)
    }
}

/// RIPEMD-160(SHA-256(data)) — Bitcoin's standard short hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    out
}

/// Double SHA-256, used for Base58Check checksums and the legacy
/// transaction/block hashing convention.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Encodes `version ∥ hash ∥ checksum` as Base58Check.
fn base58check_encode(version: u8, hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21 + 4);
    payload.push(version);
    payload.extend_from_slice(hash);
    let checksum = sha256d(&payload);
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

/// Decodes a Base58Check address, verifying the checksum, and returns
/// `(version, hash160)`.
pub fn base58check_decode(s: &str) -> Result<(u8, [u8; 20])> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| Error::AddressFormat(e.to_string()))?;
    if raw.len() != 25 {
        return Err(Error::AddressFormat(format!("expected 25 bytes, got {}", raw.len())));
    }
    let (body, checksum) = raw.split_at(21);
    let expected = sha256d(body);
    if &expected[..4] != checksum {
        return Err(Error::AddressFormat("bad checksum".into()));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&body[1..]);
    Ok((body[0], hash))
}

/// Encodes a pay-to-pubkey-hash address for `network`.
pub fn encode_p2pkh_address(pubkey_hash: &[u8; 20], network: Network) -> String {
    base58check_encode(network.p2pkh_version(), pubkey_hash)
}

/// Encodes a pay-to-script-hash address for `network`.
pub fn encode_p2sh_address(script_hash: &[u8; 20], network: Network) -> String {
    base58check_encode(network.p2sh_version(), script_hash)
}

/// Signs `digest` (already a 32-byte message hash) with `secret`, applies
/// low-s normalisation, DER-encodes the result and appends `sighash_type`
/// as the final byte — the wire form Bitcoin inputs embed.
pub fn sign_der(secret: &SecretKey, digest: &[u8; 32], sighash_type: u8) -> Result<Vec<u8>> {
    let secp = Secp256k1::new();
    let msg = Message::from_digest(*digest);
    let mut sig = secp.sign_ecdsa(&msg, secret);
    sig.normalize_s();
    let mut der = sig.serialize_der().to_vec();
    der.push(sighash_type);
    Ok(der)
}

/// Verifies a Bitcoin-style signature (DER + trailing sighash byte) against
/// `public` over `digest`.
pub fn verify_der(public: &PublicKey, digest: &[u8; 32], sig_with_type: &[u8]) -> Result<()> {
    if sig_with_type.is_empty() {
        return Err(Error::InvalidSignature("empty signature".into()));
    }
    let (der, _sighash_type) = sig_with_type.split_at(sig_with_type.len() - 1);
    let sig = ecdsa::Signature::from_der(der)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    let secp = Secp256k1::new();
    let msg = Message::from_digest(*digest);
    secp.verify_ecdsa(&msg, &sig, public)
        .map_err(|e| Error::InvalidSignature(e.to_string()))
}

/// Checks a serialised signature (DER + trailing sighash byte) against
/// Bitcoin Core's `IsCanonicalSignature` rules: overall length 9–73, type
/// byte `0x30`, length byte matches remaining buffer, non-negative R/S with
/// no excess leading-zero padding, and an accepted sighash-type byte.
pub fn is_canonical_signature(sig: &[u8]) -> bool {
    fn accepted_sighash(b: u8) -> bool {
        let base = b & !0x80; // strip ANYONECANPAY
        (1..=3).contains(&base)
    }

    let len = sig.len();
    if !(9..=73).contains(&len) {
        return false;
    }
    if sig[0] != 0x30 || sig[1] as usize != len - 3 {
        return false;
    }
    if sig[2] != 0x02 {
        return false;
    }
    let len_r = sig[3] as usize;
    if len_r == 0 || 4 + len_r >= len {
        return false;
    }
    if sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && sig[5] & 0x80 == 0 {
        return false;
    }
    let s_type_idx = 4 + len_r;
    if sig[s_type_idx] != 0x02 {
        return false;
    }
    let len_s = sig[s_type_idx + 1] as usize;
    if len_s == 0 || s_type_idx + 2 + len_s != len - 1 {
        return false;
    }
    let s_start = s_type_idx + 2;
    if sig[s_start] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[s_start] == 0x00 && sig[s_start + 1] & 0x80 == 0 {
        return false;
    }
    accepted_sighash(sig[len - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash160_known_vector() {
        // HASH160 of the empty string.
        let h = hash160(&[]);
        assert_eq!(hex::encode(h), "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb");
    }

    #[test]
    fn address_roundtrip() {
        let kp = KeyPair::generate();
        let addr = kp.address(Network::Mainnet);
        let (version, hash) = base58check_decode(&addr).unwrap();
        assert_eq!(version, Network::Mainnet.p2pkh_version());
        assert_eq!(hash, kp.pubkey_hash());
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let kp = KeyPair::generate();
        let digest = sha256d(b"hello wallet");
        let sig = sign_der(&kp.secret.unwrap(), &digest, 0x01).unwrap();
        assert!(is_canonical_signature(&sig));
        verify_der(&kp.public, &digest, &sig).unwrap();
    }

    #[test]
    fn canonical_signature_rejects_bad_type_byte() {
        let kp = KeyPair::generate();
        let digest = sha256d(b"another message");
        let mut sig = sign_der(&kp.secret.unwrap(), &digest, 0x01).unwrap();
        sig[0] = 0x31;
        assert!(!is_canonical_signature(&sig));
    }
}
