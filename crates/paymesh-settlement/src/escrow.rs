//! Escrow coordinator — the two-wallet state machine.
//!
//! Opening an escrow reserves the amount on the source wallet (a hold) and
//! records the promise. Settling it is the one place in the engine where
//! two wallets mutate under a single atomicity boundary:
//!
//! 1. source `balance`/`reserved` drop by the amount
//! 2. destination `balance` grows by the amount
//! 3. the backing HOLD row settles, a RELEASE row records the outflow
//! 4. a CREDIT row records the inflow, the escrow goes RELEASED
//!
//! All of it commits in one write set — a partial failure here would be the
//! only way money could be created or destroyed, so there is none.
//!
//! Settling or cancelling an escrow that already reached the *desired*
//! terminal state returns the existing record (safe retries); reaching for
//! the opposite terminal state is a caller bug and errors.

use paymesh_types::{
    Escrow, EscrowId, EscrowStatus, Money, PaymeshError, Result, Transaction, TransactionKind,
    TransactionStatus, WalletId, constants,
};
use tracing::{debug, error};

use paymesh_ledger::{
    CommitError, Ledger, WriteOp, plan_cancel_hold, plan_hold, plan_release,
};

/// Coordinates hold-then-settle-or-cancel across a source and destination
/// wallet.
#[derive(Clone)]
pub struct EscrowCoordinator {
    ledger: Ledger,
    max_retries: u32,
}

impl EscrowCoordinator {
    /// Create a coordinator over the given ledger with default retry bounds.
    #[must_use]
    pub fn new(ledger: Ledger) -> Self {
        Self::with_retries(ledger, constants::MAX_COMMIT_RETRIES)
    }

    /// Create a coordinator with a custom commit-retry bound.
    #[must_use]
    pub fn with_retries(ledger: Ledger, max_retries: u32) -> Self {
        Self {
            ledger,
            max_retries,
        }
    }

    /// Open an escrow: reserve `amount` on the source wallet and record the
    /// promise toward the destination, in one atomic unit.
    ///
    /// A retried `open` whose reference already backs a HELD escrow on this
    /// source returns the existing escrow instead of double-reserving.
    ///
    /// # Errors
    /// `SelfEscrow`, `WalletNotFound`, `CurrencyMismatch`, plus everything
    /// `hold` can fail with (`InsufficientFunds`, `WalletFrozen`, ...).
    pub async fn open(
        &self,
        source: WalletId,
        destination: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Escrow> {
        if source == destination {
            return Err(PaymeshError::SelfEscrow(source));
        }
        let mut retries = 0;
        loop {
            if let Some(existing) = self.ledger.find_held_escrow(source, reference).await {
                debug!(
                    escrow = %existing.id,
                    reference,
                    "open retry recognized; returning existing escrow"
                );
                return Ok(existing);
            }
            let src = self.ledger.live_wallet(source).await?;
            let dst = self.ledger.live_wallet(destination).await?;
            if src.currency != dst.currency {
                return Err(PaymeshError::CurrencyMismatch {
                    expected: src.currency.clone(),
                    actual: dst.currency.clone(),
                });
            }
            let (hold_row, mut ops) = plan_hold(&src, amount, reference)?;
            let escrow = Escrow::new(source, destination, amount, hold_row.id, reference);
            ops.push(WriteOp::InsertEscrow(escrow.clone()));
            match self.ledger.commit(ops).await {
                Ok(()) => return Ok(escrow),
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

    /// Settle an escrow: move the amount from source to destination.
    ///
    /// Valid from HELD; settling an already-RELEASED escrow returns the
    /// existing record unchanged (idempotent retry), settling a CANCELLED
    /// one is [`PaymeshError::InvalidEscrowState`].
    ///
    /// # Errors
    /// `EscrowNotFound`, `InvalidEscrowState`, `InvariantViolation` if the
    /// backing hold went missing, or `Contention`.
    pub async fn settle(&self, escrow_id: EscrowId) -> Result<Escrow> {
        let mut retries = 0;
        loop {
            let escrow = self
                .ledger
                .escrow(escrow_id)
                .await
                .ok_or(PaymeshError::EscrowNotFound(escrow_id))?;
            match escrow.status {
                EscrowStatus::Released => return Ok(escrow),
                EscrowStatus::Cancelled => {
                    return Err(PaymeshError::InvalidEscrowState {
                        escrow_id,
                        status: escrow.status,
                    });
                }
                EscrowStatus::Held => {}
            }

            let src = self
                .ledger
                .wallet(escrow.source_wallet_id)
                .await
                .ok_or(PaymeshError::WalletNotFound(escrow.source_wallet_id))?;
            let dst = self
                .ledger
                .wallet(escrow.destination_wallet_id)
                .await
                .ok_or(PaymeshError::WalletNotFound(escrow.destination_wallet_id))?;
            let hold = self.backing_hold(&escrow).await?;

            // Source side: honor the hold (balance and reserved both drop).
            let (_, mut ops) =
                plan_release(&src, Some(&hold), escrow.amount, &escrow.reference)?;
            // Destination side: credit the amount with its journal row.
            let credit = Transaction::new(
                escrow.destination_wallet_id,
                TransactionKind::Credit,
                TransactionStatus::Settled,
                escrow.amount,
                escrow.reference.as_str(),
            );
            ops.push(WriteOp::AdjustBalance {
                wallet_id: dst.id,
                expected_version: dst.version,
                balance_delta: escrow.amount.amount(),
                reserved_delta: rust_decimal::Decimal::ZERO,
            });
            ops.push(WriteOp::AppendTransaction(credit));
            ops.push(WriteOp::TransitionEscrow {
                escrow_id,
                to: EscrowStatus::Released,
            });

            match self.ledger.commit(ops).await {
                Ok(()) => return self.get(escrow_id).await,
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

    /// Cancel an escrow: return the reserved amount to the source wallet's
    /// available balance.
    ///
    /// Valid from HELD; cancelling an already-CANCELLED escrow returns the
    /// existing record (idempotent retry), cancelling a RELEASED one is
    /// [`PaymeshError::InvalidEscrowState`].
    ///
    /// # Errors
    /// Same classes as [`EscrowCoordinator::settle`].
    pub async fn cancel(&self, escrow_id: EscrowId) -> Result<Escrow> {
        let mut retries = 0;
        loop {
            let escrow = self
                .ledger
                .escrow(escrow_id)
                .await
                .ok_or(PaymeshError::EscrowNotFound(escrow_id))?;
            match escrow.status {
                EscrowStatus::Cancelled => return Ok(escrow),
                EscrowStatus::Released => {
                    return Err(PaymeshError::InvalidEscrowState {
                        escrow_id,
                        status: escrow.status,
                    });
                }
                EscrowStatus::Held => {}
            }

            let src = self
                .ledger
                .wallet(escrow.source_wallet_id)
                .await
                .ok_or(PaymeshError::WalletNotFound(escrow.source_wallet_id))?;
            let hold = self.backing_hold(&escrow).await?;

            let (_, mut ops) =
                plan_cancel_hold(&src, Some(&hold), escrow.amount, &escrow.reference)?;
            ops.push(WriteOp::TransitionEscrow {
                escrow_id,
                to: EscrowStatus::Cancelled,
            });

            match self.ledger.commit(ops).await {
                Ok(()) => return self.get(escrow_id).await,
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

    /// Read an escrow row.
    ///
    /// # Errors
    /// [`PaymeshError::EscrowNotFound`] if no such row exists.
    pub async fn get(&self, escrow_id: EscrowId) -> Result<Escrow> {
        self.ledger
            .escrow(escrow_id)
            .await
            .ok_or(PaymeshError::EscrowNotFound(escrow_id))
    }

    /// Fetch the PENDING hold backing a HELD escrow. A HELD escrow whose
    /// hold is missing or already terminal means the store is corrupted.
    async fn backing_hold(&self, escrow: &Escrow) -> Result<Transaction> {
        let hold = self
            .ledger
            .transaction(escrow.transaction_id)
            .await
            .filter(|t| t.reserves());
        match hold {
            Some(t) => Ok(t),
            None => {
                let reason = format!(
                    "escrow {} is HELD but its hold {} is missing or not pending",
                    escrow.id, escrow.transaction_id
                );
                error!(escrow = %escrow.id, %reason, "invariant violation");
                Err(PaymeshError::InvariantViolation { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paymesh_ledger::WalletStore;
    use paymesh_types::Owner;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    struct Fixture {
        ledger: Ledger,
        escrows: EscrowCoordinator,
        source: WalletId,
        destination: WalletId,
    }

    async fn fixture(source_minor: u64) -> Fixture {
        let ledger = Ledger::new();
        let wallets = WalletStore::new(ledger.clone());
        let source = wallets
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        let destination = wallets
            .ensure_wallet(Owner::agent(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        wallets
            .adjust_balance(
                source.id,
                Money::from_minor_units(source_minor).amount(),
                Decimal::ZERO,
            )
            .await
            .unwrap();
        Fixture {
            escrows: EscrowCoordinator::new(ledger.clone()),
            ledger,
            source: source.id,
            destination: destination.id,
        }
    }

    #[tokio::test]
    async fn open_reserves_on_source() {
        let f = fixture(10_000).await;
        let escrow = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();
        assert_eq!(escrow.status, EscrowStatus::Held);

        let src = f.ledger.wallet(f.source).await.unwrap();
        assert_eq!(src.balance, Money::from_minor_units(10_000));
        assert_eq!(src.reserved, Money::from_minor_units(4_000));

        // The backing hold is PENDING and shares the reference.
        let hold = f.ledger.transaction(escrow.transaction_id).await.unwrap();
        assert!(hold.reserves());
        assert_eq!(hold.reference, "exec:1");
    }

    #[tokio::test]
    async fn open_insufficient_funds_writes_nothing() {
        let f = fixture(1_000).await;
        let err = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::InsufficientFunds { .. }));

        let src = f.ledger.wallet(f.source).await.unwrap();
        assert_eq!(src.reserved, Money::ZERO);
        assert!(f.ledger.escrow_count().await == 0);
    }

    #[tokio::test]
    async fn settle_moves_amount_atomically() {
        let f = fixture(10_000).await;
        let escrow = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();

        let settled = f.escrows.settle(escrow.id).await.unwrap();
        assert_eq!(settled.status, EscrowStatus::Released);
        assert!(settled.released_at.is_some());

        let src = f.ledger.wallet(f.source).await.unwrap();
        assert_eq!(src.balance, Money::from_minor_units(6_000));
        assert_eq!(src.reserved, Money::ZERO);

        let dst = f.ledger.wallet(f.destination).await.unwrap();
        assert_eq!(dst.balance, Money::from_minor_units(4_000));
    }

    #[tokio::test]
    async fn cancel_restores_availability() {
        let f = fixture(10_000).await;
        let escrow = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();

        let cancelled = f.escrows.cancel(escrow.id).await.unwrap();
        assert_eq!(cancelled.status, EscrowStatus::Cancelled);

        let src = f.ledger.wallet(f.source).await.unwrap();
        assert_eq!(src.balance, Money::from_minor_units(10_000));
        assert_eq!(src.reserved, Money::ZERO);

        let dst = f.ledger.wallet(f.destination).await.unwrap();
        assert_eq!(dst.balance, Money::ZERO);
    }

    #[tokio::test]
    async fn settle_twice_is_idempotent() {
        let f = fixture(10_000).await;
        let escrow = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();

        let first = f.escrows.settle(escrow.id).await.unwrap();
        let second = f.escrows.settle(escrow.id).await.unwrap();
        assert_eq!(first.status, EscrowStatus::Released);
        assert_eq!(second.status, EscrowStatus::Released);
        assert_eq!(first.released_at, second.released_at);

        // Only one set of balance changes was applied.
        let dst = f.ledger.wallet(f.destination).await.unwrap();
        assert_eq!(dst.balance, Money::from_minor_units(4_000));
    }

    #[tokio::test]
    async fn settle_after_cancel_errors() {
        let f = fixture(10_000).await;
        let escrow = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();
        f.escrows.cancel(escrow.id).await.unwrap();

        let err = f.escrows.settle(escrow.id).await.unwrap_err();
        assert!(matches!(err, PaymeshError::InvalidEscrowState { .. }));

        // And the reverse direction on the settled path.
        let escrow2 = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(1_000), "exec:2")
            .await
            .unwrap();
        f.escrows.settle(escrow2.id).await.unwrap();
        let err = f.escrows.cancel(escrow2.id).await.unwrap_err();
        assert!(matches!(err, PaymeshError::InvalidEscrowState { .. }));
    }

    #[tokio::test]
    async fn open_retry_same_reference_returns_existing() {
        let f = fixture(10_000).await;
        let first = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();
        let second = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);

        let src = f.ledger.wallet(f.source).await.unwrap();
        assert_eq!(src.reserved, Money::from_minor_units(4_000));
    }

    #[tokio::test]
    async fn self_escrow_rejected() {
        let f = fixture(10_000).await;
        let err = f
            .escrows
            .open(f.source, f.source, Money::from_minor_units(100), "exec:1")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::SelfEscrow(_)));
    }

    #[tokio::test]
    async fn cross_currency_escrow_rejected() {
        let ledger = Ledger::new();
        let wallets = WalletStore::new(ledger.clone());
        let usd = wallets
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        let eur = wallets
            .ensure_wallet(Owner::agent(Uuid::now_v7()), "EUR")
            .await
            .unwrap();
        wallets
            .adjust_balance(usd.id, Money::from_minor_units(10_000).amount(), Decimal::ZERO)
            .await
            .unwrap();

        let escrows = EscrowCoordinator::new(ledger);
        let err = escrows
            .open(usd.id, eur.id, Money::from_minor_units(100), "exec:1")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::CurrencyMismatch { .. }));
    }

    #[tokio::test]
    async fn concurrent_settle_and_cancel_single_winner() {
        let f = fixture(10_000).await;
        let escrow = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();

        let settle = {
            let escrows = f.escrows.clone();
            let id = escrow.id;
            tokio::spawn(async move { escrows.settle(id).await })
        };
        let cancel = {
            let escrows = f.escrows.clone();
            let id = escrow.id;
            tokio::spawn(async move { escrows.cancel(id).await })
        };
        let settle = settle.await.unwrap();
        let cancel = cancel.await.unwrap();

        // Exactly one side wins; the loser sees InvalidEscrowState.
        assert_ne!(settle.is_ok(), cancel.is_ok());

        // Whatever happened, the invariants hold and reserved is drained.
        let src = f.ledger.wallet(f.source).await.unwrap();
        let dst = f.ledger.wallet(f.destination).await.unwrap();
        assert_eq!(src.reserved, Money::ZERO);
        if settle.is_ok() {
            assert_eq!(src.balance, Money::from_minor_units(6_000));
            assert_eq!(dst.balance, Money::from_minor_units(4_000));
        } else {
            assert_eq!(src.balance, Money::from_minor_units(10_000));
            assert_eq!(dst.balance, Money::ZERO);
        }
    }

    #[tokio::test]
    async fn hold_and_escrow_share_one_atomic_open() {
        // A failed open (frozen source) must leave neither a hold nor an
        // escrow behind.
        let f = fixture(10_000).await;
        let wallets = WalletStore::new(f.ledger.clone());
        wallets.freeze(f.source).await.unwrap();

        let err = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(100), "exec:1")
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::WalletFrozen(_)));
        assert_eq!(f.ledger.transactions_for_wallet(f.source).await.len(), 0);
        assert_eq!(f.ledger.escrow_count().await, 0);
    }

    #[tokio::test]
    async fn settle_works_on_frozen_wallets() {
        // Freezing either side after open must not block resolution.
        let f = fixture(10_000).await;
        let escrow = f
            .escrows
            .open(f.source, f.destination, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();

        let wallets = WalletStore::new(f.ledger.clone());
        wallets.freeze(f.source).await.unwrap();
        wallets.freeze(f.destination).await.unwrap();

        let settled = f.escrows.settle(escrow.id).await.unwrap();
        assert_eq!(settled.status, EscrowStatus::Released);
        let dst = f.ledger.wallet(f.destination).await.unwrap();
        assert_eq!(dst.balance, Money::from_minor_units(4_000));
    }
}
