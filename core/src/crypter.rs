//! Key Crypter: scrypt-derived AES-256/CBC/PKCS7 wrapping of private key
//! bytes.
//!
//! One [`KeyCrypter`] belongs to exactly one wallet. Its `id` lets callers
//! detect an attempt to mix keys encrypted by two different crypters in the
//! same chain (`MismatchedEncrypter` in spec.md §4.2).

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use scrypt::Params as ScryptParams;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// scrypt cost parameters persisted alongside the ciphertext so a future
/// decrypt can reproduce the same derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScryptCost {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
    pub salt: [u8; 8],
}

impl ScryptCost {
    /// Generates fresh cost parameters with a random salt at a reasonable
    /// interactive-use work factor (N = 2^14).
    pub fn generate() -> Self {
        let mut salt = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self { log_n: 14, r: 8, p: 1, salt }
    }
}

/// AES-256/CBC key-wrapping object for one wallet.
#[derive(Debug, Clone)]
pub struct KeyCrypter {
    pub id: u64,
    pub cost: ScryptCost,
}

/// An IV + ciphertext pair: the on-disk form of a wrapped private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub iv: [u8; 16],
    pub ciphertext: Vec<u8>,
}

impl KeyCrypter {
    /// Creates a fresh crypter with a random identity and fresh scrypt
    /// parameters.
    pub fn generate() -> Self {
        let mut id_bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut id_bytes);
        Self { id: u64::from_le_bytes(id_bytes), cost: ScryptCost::generate() }
    }

    /// Reconstructs a crypter from persisted cost parameters (used when
    /// loading a serialised wallet — the identity is not round-tripped
    /// since mismatched-encrypter detection only matters within one
    /// in-memory session; on load every key was wrapped by the same
    /// crypter by construction).
    pub fn from_cost(id: u64, cost: ScryptCost) -> Self {
        Self { id, cost }
    }

    /// Derives a 256-bit AES key from `passphrase` via scrypt using this
    /// crypter's persisted cost parameters.
    pub fn derive_key(&self, passphrase: &str) -> Result<Zeroizing<[u8; 32]>> {
        let params = ScryptParams::new(self.cost.log_n, self.cost.r, self.cost.p, 32)
            .map_err(|e| Error::Other(format!("bad scrypt params: {e}")))?;
        let mut out = Zeroizing::new([0u8; 32]);
        scrypt::scrypt(passphrase.as_bytes(), &self.cost.salt, &params, out.as_mut())
            .map_err(|e| Error::Other(format!("scrypt failed: {e}")))?;
        Ok(out)
    }

    /// Encrypts `plaintext` under `derived` with a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8], derived: &[u8; 32]) -> EncryptedData {
        let mut iv = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let ciphertext =
            Aes256CbcEnc::new(derived.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        EncryptedData { iv, ciphertext }
    }

    /// Decrypts `data` under `derived`. Fails with [`Error::WrongPassphrase`]
    /// when PKCS7 unpadding does not validate — the only externally visible
    /// signal that the passphrase was wrong.
    pub fn decrypt(&self, data: &EncryptedData, derived: &[u8; 32]) -> Result<Zeroizing<Vec<u8>>> {
        let plaintext = Aes256CbcDec::new(derived.into(), &data.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&data.ciphertext)
            .map_err(|_| Error::WrongPassphrase)?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let crypter = KeyCrypter::generate();
        let derived = crypter.derive_key("correct horse battery staple").unwrap();
        let plaintext = b"a 32-byte secp256k1 private scalar!";
        let wrapped = crypter.encrypt(plaintext, &derived);
        let recovered = crypter.decrypt(&wrapped, &derived).unwrap();
        assert_eq!(&recovered[..], &plaintext[..]);
    }

    #[test]
    fn wrong_passphrase_is_detected() {
        let crypter = KeyCrypter::generate();
        let derived = crypter.derive_key("right").unwrap();
        let wrong_derived = crypter.derive_key("wrong").unwrap();
        let wrapped = crypter.encrypt(b"canary-plaintext", &derived);
        let err = crypter.decrypt(&wrapped, &wrong_derived).unwrap_err();
        assert!(matches!(err, Error::WrongPassphrase));
    }
}
