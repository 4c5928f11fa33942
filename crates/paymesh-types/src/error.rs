//! Error types for the PayMesh settlement engine.
//!
//! All errors use the `PM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Wallet errors
//! - 2xx: Amount / funds errors
//! - 3xx: Transaction / hold errors
//! - 4xx: Escrow errors
//! - 5xx: Concurrency errors
//! - 9xx: General / internal errors
//!
//! Every error from the settlement boundary means "no funds moved": no
//! operation applies a partial write and then fails.

use thiserror::Error;

use crate::{EscrowId, EscrowStatus, Money, Owner, TransactionId, TransactionStatus, WalletId};

/// Central error enum for all PayMesh operations.
#[derive(Debug, Error)]
pub enum PaymeshError {
    // =================================================================
    // Wallet Errors (1xx)
    // =================================================================
    /// The referenced wallet does not exist or is CLOSED.
    #[error("PM_ERR_100: Wallet not found or closed: {0}")]
    WalletNotFound(WalletId),

    /// The wallet is FROZEN and rejects new balance-affecting activity.
    #[error("PM_ERR_101: Wallet is frozen: {0}")]
    WalletFrozen(WalletId),

    /// A wallet with funds cannot be closed.
    #[error("PM_ERR_102: Wallet {wallet_id} is not empty: balance {balance}, reserved {reserved}")]
    WalletNotEmpty {
        wallet_id: WalletId,
        balance: Money,
        reserved: Money,
    },

    /// The owner already has a live wallet. Surfaced by the storage layer;
    /// the creation path treats it as "someone else just created it".
    #[error("PM_ERR_103: Owner already has a wallet: {0}")]
    DuplicateWallet(Owner),

    // =================================================================
    // Amount / Funds Errors (2xx)
    // =================================================================
    /// Requested hold/debit exceeds the wallet's available balance.
    #[error("PM_ERR_200: Insufficient available funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Money, available: Money },

    /// The amount is structurally invalid (negative, zero, or off-scale).
    #[error("PM_ERR_201: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Source and destination wallets carry different currencies.
    #[error("PM_ERR_202: Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    // =================================================================
    // Transaction / Hold Errors (3xx)
    // =================================================================
    /// The referenced journal row was not found.
    #[error("PM_ERR_300: Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The journal row cannot transition from its current status.
    #[error("PM_ERR_301: Invalid transition for {transaction_id}: {from} -> {to}")]
    InvalidTransition {
        transaction_id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    // =================================================================
    // Escrow Errors (4xx)
    // =================================================================
    /// The referenced escrow was not found.
    #[error("PM_ERR_400: Escrow not found: {0}")]
    EscrowNotFound(EscrowId),

    /// The escrow is not in the state the operation requires.
    #[error("PM_ERR_401: Escrow {escrow_id} is {status}, not HELD")]
    InvalidEscrowState {
        escrow_id: EscrowId,
        status: EscrowStatus,
    },

    /// Source and destination wallet are the same.
    #[error("PM_ERR_402: Escrow source and destination wallet are the same: {0}")]
    SelfEscrow(WalletId),

    // =================================================================
    // Concurrency Errors (5xx)
    // =================================================================
    /// The atomic unit could not be committed after bounded retries due to
    /// concurrent writers. The caller may retry.
    #[error("PM_ERR_500: Commit contention after {retries} retries")]
    Contention { retries: u32 },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// An internal consistency check failed. Non-recoverable: indicates a
    /// bug in this engine or a corrupted store, and must be surfaced loudly.
    #[error("PM_ERR_900: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Unrecoverable internal error.
    #[error("PM_ERR_901: Internal error: {0}")]
    Internal(String),
}

impl PaymeshError {
    /// Whether a caller can meaningfully retry the failed operation.
    ///
    /// `Contention` is transient; everything else is either caller-visible
    /// (wrong amount, wrong state) or fatal (`InvariantViolation`).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PaymeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = PaymeshError::WalletNotFound(WalletId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("PM_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn insufficient_funds_display() {
        let err = PaymeshError::InsufficientFunds {
            needed: Money::from_minor_units(10_000),
            available: Money::from_minor_units(5_000),
        };
        let msg = format!("{err}");
        assert!(msg.contains("PM_ERR_200"));
        assert!(msg.contains("100.00"));
        assert!(msg.contains("50.00"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = PaymeshError::InvalidTransition {
            transaction_id: TransactionId::new(),
            from: TransactionStatus::Settled,
            to: TransactionStatus::Cancelled,
        };
        let msg = format!("{err}");
        assert!(msg.contains("PM_ERR_301"));
        assert!(msg.contains("SETTLED"));
        assert!(msg.contains("CANCELLED"));
    }

    #[test]
    fn all_errors_have_pm_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(PaymeshError::WalletFrozen(WalletId::new())),
            Box::new(PaymeshError::SelfEscrow(WalletId::new())),
            Box::new(PaymeshError::Contention { retries: 4 }),
            Box::new(PaymeshError::InvariantViolation {
                reason: "test".into(),
            }),
            Box::new(PaymeshError::Internal("test".into())),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("PM_ERR_"),
                "Error missing PM_ERR_ prefix: {msg}"
            );
        }
    }

    #[test]
    fn only_contention_is_retryable() {
        assert!(PaymeshError::Contention { retries: 1 }.is_retryable());
        assert!(!PaymeshError::WalletNotFound(WalletId::new()).is_retryable());
        assert!(
            !PaymeshError::InvariantViolation {
                reason: "x".into()
            }
            .is_retryable()
        );
    }
}
