//! BIP39 mnemonic sentences: entropy <-> word list <-> 64-byte seed.
//!
//! The 2048-word English wordlist itself is sourced from the `bip39` crate
//! (`bip39::Language::English.word_list()`); the entropy/checksum/index
//! mapping and the PBKDF2 seed stretch are implemented directly against
//! spec.md §4.3/§6 rather than using that crate's own mnemonic type, since
//! this wallet needs byte-exact control over the checksum and normalisation
//! steps (and, eventually, encrypted-mnemonic storage which the upstream
//! type does not model).

use bip39::Language;
use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha2::{Digest, Sha256, Sha512};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

const PBKDF2_ROUNDS: u32 = 2048;

/// Valid entropy lengths in bits, per spec.md §3.
const VALID_ENTROPY_BITS: [usize; 6] = [128, 160, 192, 224, 256, 512];

/// A BIP39 mnemonic: the word sequence plus the entropy it encodes.
#[derive(Clone)]
pub struct Mnemonic {
    pub words: Vec<&'static str>,
    entropy: Zeroizing<Vec<u8>>,
}

impl Mnemonic {
    /// Builds a mnemonic from entropy bytes, appending the
    /// `entropy_bits / 32` checksum bits derived from SHA-256(entropy) and
    /// mapping each resulting 11-bit group to a wordlist entry.
    pub fn from_entropy(entropy: &[u8]) -> Result<Self> {
        let bits = entropy.len() * 8;
        if !VALID_ENTROPY_BITS.contains(&bits) {
            return Err(Error::InvalidMnemonic(format!(
                "entropy length {bits} bits is not one of {VALID_ENTROPY_BITS:?}"
            )));
        }

        let checksum_bits = bits / 32;
        let checksum_byte = Sha256::digest(entropy)[0];

        let mut bitstream: Vec<bool> = Vec::with_capacity(bits + checksum_bits);
        for byte in entropy {
            for i in (0..8).rev() {
                bitstream.push((byte >> i) & 1 == 1);
            }
        }
        for i in 0..checksum_bits {
            bitstream.push((checksum_byte >> (7 - i)) & 1 == 1);
        }

        let wordlist = Language::English.word_list();
        let words = bitstream
            .chunks(11)
            .map(|group| {
                let index = group.iter().fold(0usize, |acc, &bit| (acc << 1) | bit as usize);
                wordlist[index]
            })
            .collect();

        Ok(Self { words, entropy: Zeroizing::new(entropy.to_vec()) })
    }

    /// Parses a space-joined mnemonic sentence, validating word-list
    /// membership, overall length and the embedded checksum.
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        let wordlist = Language::English.word_list();
        let words: Vec<&'static str> = phrase
            .split_whitespace()
            .map(|w| {
                wordlist
                    .iter()
                    .find(|&&candidate| candidate == w)
                    .copied()
                    .ok_or_else(|| Error::InvalidMnemonic(format!("word not in wordlist: {w}")))
            })
            .collect::<Result<_>>()?;

        let total_bits = words.len() * 11;
        let checksum_bits = total_bits % 32;
        if checksum_bits == 0 || words.is_empty() {
            return Err(Error::InvalidMnemonic(format!("bad word count: {}", words.len())));
        }
        let entropy_bits = total_bits - checksum_bits;
        if !VALID_ENTROPY_BITS.contains(&entropy_bits) {
            return Err(Error::InvalidMnemonic(format!("implied entropy length {entropy_bits} bits invalid")));
        }

        let mut bitstream: Vec<bool> = Vec::with_capacity(total_bits);
        for word in &words {
            let index = wordlist.iter().position(|&w| w == *word).expect("validated above");
            for i in (0..11).rev() {
                bitstream.push((index >> i) & 1 == 1);
            }
        }

        let entropy_bytes: Vec<u8> = bitstream[..entropy_bits]
            .chunks(8)
            .map(|byte_bits| byte_bits.iter().fold(0u8, |acc, &bit| (acc << 1) | bit as u8))
            .collect();

        let checksum_byte = Sha256::digest(&entropy_bytes)[0];
        for (i, expected_bit) in bitstream[entropy_bits..].iter().enumerate() {
            let actual = (checksum_byte >> (7 - i)) & 1 == 1;
            if actual != *expected_bit {
                return Err(Error::InvalidMnemonic("checksum mismatch".into()));
            }
        }

        Ok(Self { words, entropy: Zeroizing::new(entropy_bytes) })
    }

    pub fn phrase(&self) -> String {
        self.words.join(" ")
    }

    pub fn entropy(&self) -> &[u8] {
        &self.entropy
    }

    /// Derives the 64-byte binary seed: PBKDF2-HMAC-SHA512, 2048 rounds,
    /// password = NFKD-normalised space-joined mnemonic, salt =
    /// `"mnemonic"` concatenated with the (also NFKD-normalised) passphrase.
    pub fn to_seed(&self, passphrase: &str) -> Zeroizing<[u8; 64]> {
        let password: String = self.phrase().nfkd().collect();
        let salt: String = format!("mnemonic{passphrase}").nfkd().collect();

        let mut seed = Zeroizing::new([0u8; 64]);
        pbkdf2::<Hmac<Sha512>>(password.as_bytes(), salt.as_bytes(), PBKDF2_ROUNDS, seed.as_mut())
            .expect("pbkdf2 output length is valid for hmac-sha512");
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bip39_zero_entropy_vector() {
        let entropy = [0u8; 16];
        let mnemonic = Mnemonic::from_entropy(&entropy).unwrap();
        assert_eq!(
            mnemonic.phrase(),
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"
        );
        let seed = mnemonic.to_seed("");
        assert_eq!(
            hex::encode(&seed[..]),
            "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e"
        );
    }

    #[test]
    fn roundtrip_through_phrase() {
        let entropy = [7u8; 32];
        let mnemonic = Mnemonic::from_entropy(&entropy).unwrap();
        let reparsed = Mnemonic::from_phrase(&mnemonic.phrase()).unwrap();
        assert_eq!(reparsed.entropy(), &entropy[..]);
    }

    #[test]
    fn bad_checksum_rejected() {
        let entropy = [1u8; 16];
        let mnemonic = Mnemonic::from_entropy(&entropy).unwrap();
        let mut words = mnemonic.words.clone();
        let last = words.len() - 1;
        words[last] = if words[last] == "abandon" { "zoo" } else { "abandon" };
        let tampered = words.join(" ");
        assert!(Mnemonic::from_phrase(&tampered).is_err());
    }

    #[test]
    fn invalid_entropy_length_rejected() {
        assert!(Mnemonic::from_entropy(&[0u8; 15]).is_err());
    }
}
