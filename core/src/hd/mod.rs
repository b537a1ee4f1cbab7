//! Hierarchical-deterministic key derivation (BIP32), mnemonic seeds
//! (BIP39) and passphrase-protected WIF (BIP38).

pub mod bip38;
pub mod extended_key;
pub mod mnemonic;

pub use extended_key::{ChildNumber, ExtendedKey};
pub use mnemonic::Mnemonic;
