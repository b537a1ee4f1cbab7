//! Top-level wallet error, aggregating each subsystem's failures behind one
//! `kind` discriminant per spec.md §7.

use thiserror::Error;
use wallet_core::Error as CoreError;

/// Wallet-engine error type. `#[from]` lets every subsystem's error convert
/// with `?` without the caller needing to know which layer produced it.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A derived wallet (HD or random-key) requires an HD seed before the
    /// requested operation can proceed.
    #[error("wallet requires upgrade to a deterministic seed")]
    DeterministicUpgradeRequired,

    /// As above, but the existing keys are encrypted: the caller must
    /// supply the passphrase to perform the upgrade.
    #[error("deterministic upgrade requires the wallet passphrase")]
    DeterministicUpgradeRequiresPassword,

    /// A coin-selection/send attempt could not gather enough value.
    #[error("insufficient funds: missing {missing} satoshis")]
    InsufficientMoney { missing: u64 },

    /// The assembled transaction exceeds the configured maximum size.
    #[error("transaction exceeds maximum size")]
    ExceededMaxTransactionSize,

    /// A send would create an output below the dust threshold.
    #[error("send would create a dust output")]
    DustySend,

    /// Change could not be reduced further to avoid dust / fit the budget.
    #[error("could not adjust change downwards")]
    CouldNotAdjustDownwards,

    /// More than one `OP_RETURN` output was requested in a single send.
    #[error("multiple OP_RETURN outputs requested")]
    MultipleOpReturnRequested,

    /// The key chain group is encrypted and no AES key was supplied.
    #[error("wallet is encrypted but no password was supplied")]
    MissingPassword,

    /// The key chain group is encrypted and the supplied AES key is wrong.
    #[error("wrong password")]
    WrongPassword,

    /// No signing key could be found for an input being spent.
    #[error("no signing key available for input {0}")]
    MissingSigningKey(usize),

    /// A tracked-transaction invariant (pool/confidence consistency) does
    /// not hold. Should never happen; surfaced for diagnostics only.
    #[error("inconsistent wallet state: {0}")]
    InconsistentWallet(String),
}

pub type Result<T> = core::result::Result<T, WalletError>;
