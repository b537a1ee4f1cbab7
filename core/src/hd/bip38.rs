//! BIP38 passphrase-protected private keys.
//!
//! Two modes, distinguished by the first byte after the 2-byte magic:
//! non-EC-multiplied (`0x42`) and EC-multiplied (`0x43`). Both derive an
//! AES-256 key via scrypt and decrypt with AES-256/ECB with no padding
//! (BIP38 encrypts exactly two 16-byte blocks, so PKCS7 never applies).

use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes256;
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use scrypt::Params as ScryptParams;
use sha2::{Digest, Sha256};

use crate::config::Network;
use crate::ecc::{encode_p2pkh_address, hash160, sha256d};
use crate::error::{Error, Result};

const NON_EC_PREFIX: u8 = 0x42;
const EC_PREFIX: u8 = 0x43;
const COMPRESSED_FLAG: u8 = 0x20;
const LOT_SEQUENCE_FLAG: u8 = 0x04;

fn aes256_ecb_decrypt_block(key: &[u8; 32], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes256::new(key.into());
    let mut buf = aes::cipher::generic_array::GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buf);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf);
    out
}

fn xor16(a: &[u8], b: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

fn address_hash(network: Network, public: &PublicKey, compressed: bool) -> [u8; 4] {
    let pub_bytes = if compressed { public.serialize().to_vec() } else { public.serialize_uncompressed().to_vec() };
    let addr = encode_p2pkh_address(&hash160(&pub_bytes), network);
    let h = sha256d(addr.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

/// Decrypts a BIP38-encoded private key given its 39-byte payload (after
/// stripping the Base58Check wrapper) and the user's passphrase. Returns
/// the recovered scalar and whether the associated public key should be
/// compressed.
pub fn decrypt(payload: &[u8], passphrase: &str, network: Network) -> Result<(SecretKey, bool)> {
    if payload.len() != 38 {
        return Err(Error::InvalidExtendedKey(format!("bad BIP38 payload length {}", payload.len())));
    }
    let prefix = payload[0];
    let flags = payload[1];
    let compressed = flags & COMPRESSED_FLAG != 0;
    let address_hash_stored = &payload[2..6];

    match prefix {
        NON_EC_PREFIX => decrypt_non_ec(&payload[6..38], passphrase, address_hash_stored, compressed, network),
        EC_PREFIX => decrypt_ec(payload, passphrase, address_hash_stored, flags, compressed, network),
        other => Err(Error::InvalidExtendedKey(format!("unknown BIP38 prefix byte {other:#x}"))),
    }
}

fn decrypt_non_ec(
    encrypted_halves: &[u8],
    passphrase: &str,
    address_hash_stored: &[u8],
    compressed: bool,
    network: Network,
) -> Result<(SecretKey, bool)> {
    if encrypted_halves.len() != 32 {
        return Err(Error::InvalidExtendedKey("truncated non-EC BIP38 payload".into()));
    }
    let params = ScryptParams::new(14, 8, 8, 64).expect("valid scrypt params");
    let mut derived = [0u8; 64];
    scrypt::scrypt(passphrase.as_bytes(), address_hash_stored, &params, &mut derived)
        .map_err(|e| Error::Other(format!("scrypt failed: {e}")))?;
    let (derived_half1, derived_half2) = derived.split_at(32);
    let key: [u8; 32] = derived_half2.try_into().expect("32 bytes");

    let block1: [u8; 16] = encrypted_halves[0..16].try_into().unwrap();
    let block2: [u8; 16] = encrypted_halves[16..32].try_into().unwrap();
    let dec1 = xor16(&aes256_ecb_decrypt_block(&key, &block1), &derived_half1[0..16]);
    let dec2 = xor16(&aes256_ecb_decrypt_block(&key, &block2), &derived_half1[16..32]);

    let mut scalar_bytes = [0u8; 32];
    scalar_bytes[..16].copy_from_slice(&dec1);
    scalar_bytes[16..].copy_from_slice(&dec2);

    let secret = SecretKey::from_slice(&scalar_bytes).map_err(|_| Error::WrongPassphrase)?;
    verify_address_hash(&secret, compressed, address_hash_stored, network)?;
    Ok((secret, compressed))
}

fn decrypt_ec(
    payload: &[u8],
    passphrase: &str,
    address_hash_stored: &[u8],
    flags: u8,
    compressed: bool,
    network: Network,
) -> Result<(SecretKey, bool)> {
    // payload: prefix(1) flags(1) addresshash(4) ownerentropy(8) encryptedpart1(8) encryptedpart2(16)
    if payload.len() != 38 {
        return Err(Error::InvalidExtendedKey("truncated EC BIP38 payload".into()));
    }
    let owner_entropy = &payload[6..14];
    let encrypted_part1_half = &payload[14..22];
    let encrypted_part2 = &payload[22..38];
    let has_lot_sequence = flags & LOT_SEQUENCE_FLAG != 0;

    let owner_salt: &[u8] = if has_lot_sequence { &owner_entropy[..4] } else { owner_entropy };

    let pre_params = ScryptParams::new(14, 8, 8, 32).expect("valid scrypt params");
    let mut pre_factor = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), owner_salt, &pre_params, &mut pre_factor)
        .map_err(|e| Error::Other(format!("scrypt failed: {e}")))?;

    let passfactor_bytes = if has_lot_sequence {
        let mut buf = Vec::with_capacity(40);
        buf.extend_from_slice(&pre_factor);
        buf.extend_from_slice(owner_entropy);
        let h = Sha256::digest(Sha256::digest(&buf));
        h.to_vec()
    } else {
        pre_factor.to_vec()
    };
    let passfactor = SecretKey::from_slice(&passfactor_bytes).map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;

    let secp = Secp256k1::new();
    let passpoint = PublicKey::from_secret_key(&secp, &passfactor);
    let passpoint_bytes = passpoint.serialize();

    let mut salt = Vec::with_capacity(12);
    salt.extend_from_slice(address_hash_stored);
    salt.extend_from_slice(owner_entropy);
    let seedb_params = ScryptParams::new(10, 1, 1, 64).expect("valid scrypt params");
    let mut derived = [0u8; 64];
    scrypt::scrypt(&passpoint_bytes, &salt, &seedb_params, &mut derived)
        .map_err(|e| Error::Other(format!("scrypt failed: {e}")))?;
    let (derived_half1, derived_half2) = derived.split_at(32);
    let key: [u8; 32] = derived_half2.try_into().expect("32 bytes");

    let block2: [u8; 16] = encrypted_part2.try_into().map_err(|_| Error::InvalidExtendedKey("bad encryptedpart2".into()))?;
    let decrypted_part2 = xor16(&aes256_ecb_decrypt_block(&key, &block2), &derived_half1[16..32]);
    let seedb_tail = &decrypted_part2[0..8];
    let encrypted_part1_second_half = &decrypted_part2[8..16];

    let mut encrypted_part1_full = [0u8; 16];
    encrypted_part1_full[..8].copy_from_slice(encrypted_part1_half);
    encrypted_part1_full[8..].copy_from_slice(encrypted_part1_second_half);
    let decrypted_part1 = xor16(&aes256_ecb_decrypt_block(&key, &encrypted_part1_full), &derived_half1[0..16]);

    let mut seedb = Vec::with_capacity(24);
    seedb.extend_from_slice(&decrypted_part1);
    seedb.extend_from_slice(seedb_tail);

    let factorb_bytes = Sha256::digest(Sha256::digest(&seedb));
    let factorb = Scalar::from_be_bytes(factorb_bytes.into()).map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;

    let secret = passfactor.mul_tweak(&factorb).map_err(|e| Error::InvalidExtendedKey(e.to_string()))?;
    verify_address_hash(&secret, compressed, address_hash_stored, network)?;
    Ok((secret, compressed))
}

fn verify_address_hash(
    secret: &SecretKey,
    compressed: bool,
    expected: &[u8],
    network: Network,
) -> Result<()> {
    let secp = Secp256k1::new();
    let public = PublicKey::from_secret_key(&secp, secret);
    let actual = address_hash(network, &public, compressed);
    if actual != expected {
        return Err(Error::WrongPassphrase);
    }
    Ok(())
}

/// Strips and validates the 2-byte BIP38 magic from a decoded (but not yet
/// interpreted) Base58Check payload, returning the remaining 38 bytes
/// (prefix ∥ flags ∥ addresshash ∥ content).
pub fn strip_magic(decoded: &[u8]) -> Result<[u8; 38]> {
    if decoded.len() != 39 {
        return Err(Error::InvalidExtendedKey(format!("expected 39-byte BIP38 payload, got {}", decoded.len())));
    }
    if decoded[0] != 0x01 || (decoded[1] != NON_EC_PREFIX && decoded[1] != EC_PREFIX) {
        return Err(Error::InvalidExtendedKey("bad BIP38 magic bytes".into()));
    }
    let mut out = [0u8; 38];
    out[0] = decoded[1];
    out[1..].copy_from_slice(&decoded[2..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ec_decrypt_known_vector() {
        // BIP38 reference vector: no EC multiply, no compression, passphrase "TestingOneTwoThree".
        let encoded = "6PRVWUbkzzsbcVac2qwfssoUJAN1Xhrg6bNk8J7Nzm5H7kxEbn2Nh2ZoGg";
        let decoded = bs58::decode(encoded).with_check(None).into_vec().unwrap();
        let payload = strip_magic(&decoded).unwrap();
        let (secret, compressed) = decrypt(&payload, "TestingOneTwoThree", Network::Mainnet).unwrap();
        assert!(!compressed);
        assert_eq!(
            hex::encode(secret.secret_bytes()),
            "cbf4b9f70470856bb4f40f80b87edb90865997ffee6df315ab166d713af433a5"
        );
    }

    #[test]
    fn non_ec_wrong_passphrase_detected() {
        let encoded = "6PRVWUbkzzsbcVac2qwfssoUJAN1Xhrg6bNk8J7Nzm5H7kxEbn2Nh2ZoGg";
        let decoded = bs58::decode(encoded).with_check(None).into_vec().unwrap();
        let payload = strip_magic(&decoded).unwrap();
        let err = decrypt(&payload, "WrongPassphrase", Network::Mainnet).unwrap_err();
        assert!(matches!(err, Error::WrongPassphrase));
    }
}
