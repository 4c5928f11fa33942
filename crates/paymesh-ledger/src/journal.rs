//! Transaction log — the append-only journal read surface.
//!
//! Row *creation* only ever happens inside a composite write set, paired
//! with its wallet mutation (see [`crate::holds`] and the settlement API),
//! so a journal row can never disagree with the balance change it records.
//! What this layer adds is the query surface and the one legal mutation:
//! transitioning an in-flight PENDING row to SETTLED or CANCELLED.

use paymesh_types::{PaymeshError, Result, Transaction, TransactionId, TransactionStatus, WalletId};

use crate::store::{CommitError, Ledger, WriteOp};

/// Read and transition journal rows.
#[derive(Clone)]
pub struct TransactionLog {
    ledger: Ledger,
}

impl TransactionLog {
    /// Create a transaction log over the given ledger.
    #[must_use]
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Read a journal row.
    ///
    /// # Errors
    /// [`PaymeshError::TransactionNotFound`] if no such row exists.
    pub async fn get(&self, id: TransactionId) -> Result<Transaction> {
        self.ledger
            .transaction(id)
            .await
            .ok_or(PaymeshError::TransactionNotFound(id))
    }

    /// All journal rows for a wallet, oldest first.
    pub async fn for_wallet(&self, wallet_id: WalletId) -> Vec<Transaction> {
        self.ledger.transactions_for_wallet(wallet_id).await
    }

    /// The PENDING hold recorded on a wallet under the given reference, if
    /// any. This is how a timed-out caller's retry is recognized.
    pub async fn find_pending_hold(
        &self,
        wallet_id: WalletId,
        reference: &str,
    ) -> Option<Transaction> {
        match self.ledger.hold_snapshot(wallet_id, reference).await {
            Ok((_, pending)) => pending,
            Err(_) => None,
        }
    }

    /// Transition a PENDING row to SETTLED.
    ///
    /// # Errors
    /// [`PaymeshError::InvalidTransition`] if the row is not PENDING or not
    /// of a transitionable kind; [`PaymeshError::TransactionNotFound`] if
    /// it does not exist.
    pub async fn settle(&self, id: TransactionId) -> Result<Transaction> {
        self.transition(id, TransactionStatus::Settled).await
    }

    /// Transition a PENDING row to CANCELLED.
    ///
    /// # Errors
    /// Same as [`TransactionLog::settle`].
    pub async fn cancel(&self, id: TransactionId) -> Result<Transaction> {
        self.transition(id, TransactionStatus::Cancelled).await
    }

    async fn transition(&self, id: TransactionId, to: TransactionStatus) -> Result<Transaction> {
        let ops = vec![WriteOp::TransitionTransaction {
            transaction_id: id,
            to,
        }];
        match self.ledger.commit(ops).await {
            Ok(()) => self.get(id).await,
            Err(CommitError::Rejected(e)) => Err(e),
            Err(CommitError::Conflict) => Err(PaymeshError::Internal(
                "unexpected version conflict transitioning a journal row".to_string(),
            )),
        }
    }

    /// Number of rows in the journal.
    pub async fn len(&self) -> usize {
        self.ledger.journal_len().await
    }

    /// Whether the journal is empty.
    pub async fn is_empty(&self) -> bool {
        self.ledger.journal_len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holds::HoldManager;
    use crate::wallets::WalletStore;
    use paymesh_types::{Money, Owner, TransactionKind};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    async fn setup() -> (TransactionLog, HoldManager, WalletId) {
        let ledger = Ledger::new();
        let wallets = WalletStore::new(ledger.clone());
        let wallet = wallets
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        wallets
            .adjust_balance(
                wallet.id,
                Money::from_minor_units(10_000).amount(),
                Decimal::ZERO,
            )
            .await
            .unwrap();
        (
            TransactionLog::new(ledger.clone()),
            HoldManager::new(ledger),
            wallet.id,
        )
    }

    #[tokio::test]
    async fn settle_pending_hold() {
        let (journal, holds, wallet_id) = setup().await;
        let hold = holds
            .hold(wallet_id, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();

        let settled = journal.settle(hold.id).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Settled);
        assert_eq!(settled.kind, TransactionKind::Hold);
        assert!(settled.settled_at.is_some());

        // Immutable fields survived the transition.
        assert_eq!(settled.amount, hold.amount);
        assert_eq!(settled.wallet_id, hold.wallet_id);
    }

    #[tokio::test]
    async fn double_settle_is_invalid_transition() {
        let (journal, holds, wallet_id) = setup().await;
        let hold = holds
            .hold(wallet_id, Money::from_minor_units(4_000), "exec:1")
            .await
            .unwrap();

        journal.settle(hold.id).await.unwrap();
        let err = journal.cancel(hold.id).await.unwrap_err();
        assert!(matches!(err, PaymeshError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn missing_row_not_found() {
        let (journal, _, _) = setup().await;
        let err = journal.settle(TransactionId::new()).await.unwrap_err();
        assert!(matches!(err, PaymeshError::TransactionNotFound(_)));
    }

    #[tokio::test]
    async fn find_pending_hold_by_reference() {
        let (journal, holds, wallet_id) = setup().await;
        let hold = holds
            .hold(wallet_id, Money::from_minor_units(4_000), "exec:9")
            .await
            .unwrap();

        let found = journal.find_pending_hold(wallet_id, "exec:9").await.unwrap();
        assert_eq!(found.id, hold.id);
        assert!(journal.find_pending_hold(wallet_id, "exec:10").await.is_none());

        // Once settled, the reference no longer resolves to a pending hold.
        journal.settle(hold.id).await.unwrap();
        assert!(journal.find_pending_hold(wallet_id, "exec:9").await.is_none());
    }

    #[tokio::test]
    async fn for_wallet_preserves_insertion_order() {
        let (journal, holds, wallet_id) = setup().await;
        holds
            .hold(wallet_id, Money::from_minor_units(100), "exec:1")
            .await
            .unwrap();
        holds
            .hold(wallet_id, Money::from_minor_units(200), "exec:2")
            .await
            .unwrap();

        let rows = journal.for_wallet(wallet_id).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].reference, "exec:1");
        assert_eq!(rows[1].reference, "exec:2");
        assert_eq!(journal.len().await, 2);
    }
}
