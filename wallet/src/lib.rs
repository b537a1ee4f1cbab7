//! `wallet-engine`: the stateful Bitcoin wallet built on top of
//! `wallet-core`'s pure cryptography — key chains, transaction tracking,
//! the send pipeline and on-disk persistence.

pub mod bloom;
pub mod coinselector;
pub mod confidence;
pub mod error;
pub mod key;
pub mod keychain;
pub mod keychain_group;
pub mod listeners;
pub mod pool;
pub mod risk;
pub mod send;
pub mod serialization;
pub mod tx;
pub mod txpool;
pub mod wallet;

pub use error::{Result, WalletError};
pub use wallet::Wallet;
