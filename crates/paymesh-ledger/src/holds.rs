//! Hold manager — reserves funds against a wallet's available balance.
//!
//! A hold earmarks funds without moving them: `reserved` grows, `balance`
//! stays. The hold later resolves one of two ways:
//!
//! - **release**: the hold is honored and the funds actually leave
//!   (`reserved` and `balance` both shrink)
//! - **cancel**: the hold is abandoned and the funds return to the
//!   available balance (`reserved` shrinks, `balance` untouched)
//!
//! Separating reserve / release / cancel lets callers quote a price,
//! earmark funds, and later honor or abandon the quote without the wallet
//! ever going negative or the same funds being reserved twice.
//!
//! The `plan_*` functions encode the hold semantics once as write-op
//! builders; the escrow coordinator composes them into its own larger
//! atomic units.

use paymesh_types::{
    Money, PaymeshError, Result, Transaction, TransactionKind, TransactionStatus, Wallet, WalletId,
    WalletStatus, constants,
};
use rust_decimal::Decimal;
use tracing::{debug, error};

use crate::store::{CommitError, Ledger, WriteOp, WriteSet};

/// Validate a new hold against a wallet snapshot and build the ops that
/// must commit atomically: the `reserved` bump plus its PENDING journal row.
///
/// # Errors
/// - [`PaymeshError::InvalidAmount`] for a zero amount
/// - [`PaymeshError::WalletFrozen`] if the wallet rejects new activity
/// - [`PaymeshError::InsufficientFunds`] if `amount` exceeds availability
pub fn plan_hold(
    wallet: &Wallet,
    amount: Money,
    reference: &str,
) -> Result<(Transaction, WriteSet)> {
    if amount.is_zero() {
        return Err(PaymeshError::InvalidAmount {
            reason: "hold amount must be greater than zero".to_string(),
        });
    }
    if wallet.status == WalletStatus::Frozen {
        return Err(PaymeshError::WalletFrozen(wallet.id));
    }
    let available = wallet.available();
    if amount > available {
        return Err(PaymeshError::InsufficientFunds {
            needed: amount,
            available,
        });
    }
    let row = Transaction::new(
        wallet.id,
        TransactionKind::Hold,
        TransactionStatus::Pending,
        amount,
        reference,
    );
    let ops = vec![
        WriteOp::AdjustBalance {
            wallet_id: wallet.id,
            expected_version: wallet.version,
            balance_delta: Decimal::ZERO,
            reserved_delta: amount.amount(),
        },
        WriteOp::AppendTransaction(row.clone()),
    ];
    Ok((row, ops))
}

/// Build the ops that honor a hold: funds leave the wallet
/// (`reserved -= amount; balance -= amount`), the backing PENDING hold (if
/// identified) settles, and a SETTLED RELEASE row records the outflow.
///
/// # Errors
/// [`PaymeshError::InvariantViolation`] if `reserved < amount` — that
/// should be impossible when holds are tracked correctly, and is surfaced
/// loudly.
pub fn plan_release(
    wallet: &Wallet,
    hold: Option<&Transaction>,
    amount: Money,
    reference: &str,
) -> Result<(Transaction, WriteSet)> {
    plan_resolution(wallet, hold, amount, reference, TransactionStatus::Settled)
}

/// Build the ops that abandon a hold: `reserved -= amount` with the balance
/// untouched, the backing PENDING hold cancels, and a CANCELLED RELEASE row
/// records the return to availability.
///
/// # Errors
/// [`PaymeshError::InvariantViolation`] if `reserved < amount`.
pub fn plan_cancel_hold(
    wallet: &Wallet,
    hold: Option<&Transaction>,
    amount: Money,
    reference: &str,
) -> Result<(Transaction, WriteSet)> {
    plan_resolution(wallet, hold, amount, reference, TransactionStatus::Cancelled)
}

/// Shared body of [`plan_release`] / [`plan_cancel_hold`]: `outcome` decides
/// whether the balance moves (SETTLED) or only the reservation drops
/// (CANCELLED).
fn plan_resolution(
    wallet: &Wallet,
    hold: Option<&Transaction>,
    amount: Money,
    reference: &str,
    outcome: TransactionStatus,
) -> Result<(Transaction, WriteSet)> {
    if amount.is_zero() {
        return Err(PaymeshError::InvalidAmount {
            reason: "release amount must be greater than zero".to_string(),
        });
    }
    if wallet.reserved < amount {
        let reason = format!(
            "wallet {}: release of {amount} exceeds reserved {}",
            wallet.id, wallet.reserved
        );
        error!(wallet = %wallet.id, %reason, "invariant violation");
        return Err(PaymeshError::InvariantViolation { reason });
    }
    let balance_delta = if outcome == TransactionStatus::Settled {
        -amount.amount()
    } else {
        Decimal::ZERO
    };
    let row = Transaction::new(
        wallet.id,
        TransactionKind::Release,
        outcome,
        amount,
        reference,
    );
    let mut ops = vec![WriteOp::AdjustBalance {
        wallet_id: wallet.id,
        expected_version: wallet.version,
        balance_delta,
        reserved_delta: -amount.amount(),
    }];
    if let Some(hold) = hold {
        ops.push(WriteOp::TransitionTransaction {
            transaction_id: hold.id,
            to: outcome,
        });
    }
    ops.push(WriteOp::AppendTransaction(row.clone()));
    Ok((row, ops))
}

/// Turns "reserve N of wallet W's available funds" into durable,
/// reversible state.
#[derive(Clone)]
pub struct HoldManager {
    ledger: Ledger,
    max_retries: u32,
}

impl HoldManager {
    /// Create a hold manager over the given ledger with default retry bounds.
    #[must_use]
    pub fn new(ledger: Ledger) -> Self {
        Self::with_retries(ledger, constants::MAX_COMMIT_RETRIES)
    }

    /// Create a hold manager with a custom commit-retry bound.
    #[must_use]
    pub fn with_retries(ledger: Ledger, max_retries: u32) -> Self {
        Self {
            ledger,
            max_retries,
        }
    }

    /// Reserve `amount` of the wallet's available funds.
    ///
    /// Returns the PENDING HOLD row. A retried call with a reference that
    /// already has a PENDING hold on this wallet returns the existing row
    /// instead of double-reserving.
    ///
    /// # Errors
    /// `WalletNotFound`, `WalletFrozen`, `InvalidAmount`,
    /// `InsufficientFunds`, or `Contention` after bounded retries.
    pub async fn hold(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        let mut retries = 0;
        loop {
            let (wallet, existing) = self.ledger.hold_snapshot(wallet_id, reference).await?;
            if let Some(row) = existing {
                debug!(
                    wallet = %wallet_id,
                    reference,
                    transaction = %row.id,
                    "hold retry recognized; returning existing reservation"
                );
                return Ok(row);
            }
            let (row, ops) = plan_hold(&wallet, amount, reference)?;
            match self.ledger.commit(ops).await {
                Ok(()) => return Ok(row),
                Err(CommitError::Rejected(e)) => return Err(e),
                Err(CommitError::Conflict) => {
                    retries += 1;
                    if retries >= self.max_retries {
                        return Err(PaymeshError::Contention { retries });
                    }
                }
            }
        }
    }

    /// Honor a hold: the funds actually leave the wallet.
    ///
    /// # Errors
    /// `WalletNotFound`, `InvalidAmount`, `InvariantViolation` if the
    /// wallet's reserved total cannot cover `amount`, or `Contention`.
    pub async fn release(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        self.resolve(wallet_id, amount, reference, TransactionStatus::Settled)
            .await
    }

    /// Abandon a hold: the funds return to the available balance.
    ///
    /// # Errors
    /// Same as [`HoldManager::release`].
    pub async fn cancel_hold(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        self.resolve(wallet_id, amount, reference, TransactionStatus::Cancelled)
            .await
    }

    async fn resolve(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
        outcome: TransactionStatus,
    ) -> Result<Transaction> {
        let mut retries = 0;
        loop {
            let (wallet, pending) = self.ledger.hold_snapshot(wallet_id, reference).await?;
            let (row, ops) = match outcome {
                TransactionStatus::Settled => {
                    plan_release(&wallet, pending.as_ref(), amount, reference)?
                }
                _ => plan_cancel_hold(&wallet, pending.as_ref(), amount, reference)?,
            };
            match self.ledger.commit(ops).await {
                Ok(()) => return Ok(row),
                Err(CommitError::Rejected(e)) => return Err(e),
                Err(CommitError::Conflict) => {
                    retries += 1;
                    if retries >= self.max_retries {
                        return Err(PaymeshError::Contention { retries });
                    }
                }
            }
        }
    }
}
