//! Journal reconciliation — the ultimate safety net.
//!
//! The journal is the source of truth; wallet totals are a derived cache.
//! Invariant checked here, for every wallet:
//!
//! ```text
//! balance  == Σ CREDIT(settled) − Σ DEBIT(settled) − Σ RELEASE(settled)
//! reserved == Σ HOLD(pending)
//! ```
//!
//! If either equality ever breaks, something has gone catastrophically
//! wrong — a bug in this engine or a corrupted store — and the mismatch is
//! surfaced as a loud, non-recoverable `InvariantViolation`.

use paymesh_types::{PaymeshError, Result, Transaction, WalletId};
use rust_decimal::Decimal;
use tracing::error;

use paymesh_ledger::Ledger;

/// Verifies wallet totals against the journal.
#[derive(Clone)]
pub struct Reconciler {
    ledger: Ledger,
}

impl Reconciler {
    /// Create a reconciler over the given ledger.
    #[must_use]
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Verify one wallet's cached totals against the sums over its journal
    /// rows.
    ///
    /// # Errors
    /// [`PaymeshError::WalletNotFound`] if the wallet does not exist,
    /// [`PaymeshError::InvariantViolation`] on any mismatch.
    pub async fn verify_wallet(&self, wallet_id: WalletId) -> Result<()> {
        let wallet = self
            .ledger
            .wallet(wallet_id)
            .await
            .ok_or(PaymeshError::WalletNotFound(wallet_id))?;
        let rows = self.ledger.transactions_for_wallet(wallet_id).await;

        let expected_balance: Decimal = rows.iter().map(Transaction::balance_effect).sum();
        let expected_reserved: Decimal = rows
            .iter()
            .filter(|r| r.reserves())
            .map(|r| r.amount.amount())
            .sum();

        if wallet.balance.amount() != expected_balance
            || wallet.reserved.amount() != expected_reserved
        {
            let reason = format!(
                "wallet {wallet_id} does not reconcile: balance {} vs journal {expected_balance}, \
                 reserved {} vs pending holds {expected_reserved}",
                wallet.balance, wallet.reserved,
            );
            error!(wallet = %wallet_id, %reason, "reconciliation failed");
            return Err(PaymeshError::InvariantViolation { reason });
        }
        Ok(())
    }

    /// Verify every wallet in the store, including CLOSED ones.
    ///
    /// # Errors
    /// The first [`PaymeshError::InvariantViolation`] encountered.
    pub async fn verify_all(&self) -> Result<()> {
        for wallet in self.ledger.wallets().await {
            self.verify_wallet(wallet.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Settlement;
    use paymesh_types::{Money, Owner};
    use uuid::Uuid;

    #[tokio::test]
    async fn fresh_engine_reconciles() {
        let api = Settlement::new();
        api.ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        Reconciler::new(api.ledger()).verify_all().await.unwrap();
    }

    #[tokio::test]
    async fn mixed_operations_reconcile() {
        let api = Settlement::new();
        let source = api
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        let destination = api
            .ensure_wallet(Owner::agent(Uuid::now_v7()), "USD")
            .await
            .unwrap();

        api.fund(source.id, Money::from_minor_units(50_000), "topup:1")
            .await
            .unwrap();
        api.debit(source.id, Money::from_minor_units(3_000), "charge:1")
            .await
            .unwrap();
        api.hold(source.id, Money::from_minor_units(5_000), "exec:1")
            .await
            .unwrap();
        api.release(source.id, Money::from_minor_units(5_000), "exec:1")
            .await
            .unwrap();
        api.hold(source.id, Money::from_minor_units(2_000), "exec:2")
            .await
            .unwrap();
        api.cancel_hold(source.id, Money::from_minor_units(2_000), "exec:2")
            .await
            .unwrap();
        let escrow = api
            .open_escrow(
                source.id,
                destination.id,
                Money::from_minor_units(10_000),
                "exec:3",
            )
            .await
            .unwrap();
        api.settle_escrow(escrow.id).await.unwrap();
        // One still-pending hold keeps reserved non-zero.
        api.hold(source.id, Money::from_minor_units(1_500), "exec:4")
            .await
            .unwrap();

        let reconciler = Reconciler::new(api.ledger());
        reconciler.verify_wallet(source.id).await.unwrap();
        reconciler.verify_wallet(destination.id).await.unwrap();

        let wallet = api.wallet(source.id).await.unwrap();
        // 500.00 − 30.00 − 50.00 − 100.00 = 320.00, with 15.00 reserved
        assert_eq!(wallet.balance, Money::from_minor_units(32_000));
        assert_eq!(wallet.reserved, Money::from_minor_units(1_500));
    }

    #[tokio::test]
    async fn bare_balance_adjustment_fails_reconciliation() {
        // adjust_balance without a paired journal row is exactly the drift
        // the reconciler exists to catch.
        let api = Settlement::new();
        let wallet = api
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        let wallets = paymesh_ledger::WalletStore::new(api.ledger());
        wallets
            .adjust_balance(
                wallet.id,
                Money::from_minor_units(100).amount(),
                Decimal::ZERO,
            )
            .await
            .unwrap();

        let err = Reconciler::new(api.ledger())
            .verify_wallet(wallet.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::InvariantViolation { .. }));
    }

    #[tokio::test]
    async fn missing_wallet_not_found() {
        let api = Settlement::new();
        let err = Reconciler::new(api.ledger())
            .verify_wallet(WalletId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::WalletNotFound(_)));
    }
}
