//! Error types for the wallet core crate.
//!
//! Each subsystem gets one variant family; callers match on `kind` rather
//! than downcasting. `Result<T>` is the crate-wide alias used by every
//! public operation.

use thiserror::Error;

/// Core crate error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A serialised address, key or signature does not parse.
    #[error("address format error: {0}")]
    AddressFormat(String),

    /// A signature failed verification or violates Bitcoin Core's
    /// `IsCanonicalSignature` rules.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Scalar arithmetic during HD derivation produced zero or >= n for
    /// every index tried within the retry budget.
    #[error("derivation exhausted after {0} attempts")]
    DerivationExhausted(u32),

    /// A seed was shorter than the brute-force floor (9 bytes).
    #[error("seed too short: {0} bytes (minimum 9)")]
    SeedTooShort(usize),

    /// An extended-key path or serialisation is malformed.
    #[error("invalid extended key: {0}")]
    InvalidExtendedKey(String),

    /// BIP39 mnemonic or entropy failed a structural or checksum check.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// BIP38 decryption produced an address mismatch or bad padding.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// Key material is already wrapped by an encrypter.
    #[error("key already encrypted")]
    AlreadyEncrypted,

    /// Key material is not encrypted but a decrypt was requested.
    #[error("key not encrypted")]
    NotEncrypted,

    /// Two keys in the same chain were encrypted by different encrypters.
    #[error("mismatched encrypter")]
    MismatchedEncrypter,

    /// Operation needs a private scalar but the key is watching-only.
    #[error("key is watching-only")]
    KeyIsWatchingOnly,

    /// Catch-all for lower-level crate failures translated at the boundary.
    #[error("{0}")]
    Other(String),
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
