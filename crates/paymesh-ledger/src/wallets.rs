//! Wallet store — lifecycle and the low-level balance contract.
//!
//! Wallets are created lazily ("ensure the wallet for this owner") and are
//! never physically deleted: closing a wallet retains the row for audit
//! with `status = CLOSED` and zero balances. One live wallet per owner is
//! enforced by the storage layer; a creation that loses the race re-reads
//! and returns the winner's row.

use paymesh_types::{Owner, PaymeshError, Result, Wallet, WalletId, WalletStatus, constants};
use rust_decimal::Decimal;
use tracing::debug;

use crate::store::{CommitError, Ledger, WriteOp};

/// Owns wallet rows and the balance/reserved invariant on every mutation.
#[derive(Clone)]
pub struct WalletStore {
    ledger: Ledger,
    max_retries: u32,
}

impl WalletStore {
    /// Create a wallet store over the given ledger with default retry bounds.
    #[must_use]
    pub fn new(ledger: Ledger) -> Self {
        Self::with_retries(ledger, constants::MAX_COMMIT_RETRIES)
    }

    /// Create a wallet store with a custom commit-retry bound.
    #[must_use]
    pub fn with_retries(ledger: Ledger, max_retries: u32) -> Self {
        Self {
            ledger,
            max_retries,
        }
    }

    /// Return the owner's live wallet, creating one with zero balance if
    /// none exists. Idempotent: concurrent callers for the same owner end
    /// up with the same wallet — a uniqueness violation on create means
    /// someone else just created it, and we re-read.
    ///
    /// # Errors
    /// Only internal errors; the race itself is absorbed.
    pub async fn ensure_wallet(&self, owner: Owner, currency: &str) -> Result<Wallet> {
        if let Some(wallet) = self.ledger.wallet_by_owner(&owner).await {
            return Ok(wallet);
        }
        let wallet = Wallet::new(owner, currency.to_string());
        match self
            .ledger
            .commit(vec![WriteOp::InsertWallet(wallet.clone())])
            .await
        {
            Ok(()) => {
                debug!(wallet = %wallet.id, %owner, currency, "wallet created");
                Ok(wallet)
            }
            Err(CommitError::Rejected(PaymeshError::DuplicateWallet(_))) => self
                .ledger
                .wallet_by_owner(&owner)
                .await
                .ok_or_else(|| {
                    PaymeshError::Internal(format!(
                        "owner {owner} lost the creation race but has no wallet"
                    ))
                }),
            Err(CommitError::Rejected(e)) => Err(e),
            Err(CommitError::Conflict) => Err(PaymeshError::Internal(
                "unexpected version conflict inserting a wallet".to_string(),
            )),
        }
    }

    /// Read a wallet row of any status (CLOSED rows stay readable for audit).
    ///
    /// # Errors
    /// [`PaymeshError::WalletNotFound`] if no such row exists.
    pub async fn get(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.ledger
            .wallet(wallet_id)
            .await
            .ok_or(PaymeshError::WalletNotFound(wallet_id))
    }

    /// Apply balance and reserved deltas in one atomic commit, re-checking
    /// `0 <= reserved <= balance` against the hypothetical result.
    ///
    /// Low-level: settlement operations compose this same mutation with its
    /// paired journal row in a single write set; a bare `adjust_balance`
    /// leaves the journal out of sync with the wallet.
    ///
    /// # Errors
    /// `WalletNotFound`, `InsufficientFunds` / `InvariantViolation` when the
    /// invariant would break, or `Contention` after bounded retries.
    pub async fn adjust_balance(
        &self,
        wallet_id: WalletId,
        balance_delta: Decimal,
        reserved_delta: Decimal,
    ) -> Result<Wallet> {
        let mut retries = 0;
        loop {
            let wallet = self.ledger.live_wallet(wallet_id).await?;
            let ops = vec![WriteOp::AdjustBalance {
                wallet_id,
                expected_version: wallet.version,
                balance_delta,
                reserved_delta,
            }];
            match self.ledger.commit(ops).await {
                Ok(()) => return self.get(wallet_id).await,
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

    /// Freeze a wallet: new fund/debit/hold activity is rejected, in-flight
    /// holds and escrows can still resolve. Idempotent.
    ///
    /// # Errors
    /// `WalletNotFound` or `Contention`.
    pub async fn freeze(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.set_status(wallet_id, WalletStatus::Frozen).await
    }

    /// Return a frozen wallet to ACTIVE. Idempotent.
    ///
    /// # Errors
    /// `WalletNotFound` or `Contention`.
    pub async fn unfreeze(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.set_status(wallet_id, WalletStatus::Active).await
    }

    /// Close a wallet. Requires zero balance and zero reserved; the row is
    /// retained for audit and the owner may create a fresh wallet afterward.
    /// Idempotent.
    ///
    /// # Errors
    /// `WalletNotFound`, `WalletNotEmpty`, or `Contention`.
    pub async fn close(&self, wallet_id: WalletId) -> Result<Wallet> {
        let mut retries = 0;
        loop {
            let wallet = self.get(wallet_id).await?;
            if wallet.status == WalletStatus::Closed {
                return Ok(wallet);
            }
            if !(wallet.balance.is_zero() && wallet.reserved.is_zero()) {
                return Err(PaymeshError::WalletNotEmpty {
                    wallet_id,
                    balance: wallet.balance,
                    reserved: wallet.reserved,
                });
            }
            let ops = vec![WriteOp::SetWalletStatus {
                wallet_id,
                expected_version: wallet.version,
                status: WalletStatus::Closed,
            }];
            match self.ledger.commit(ops).await {
                Ok(()) => return self.get(wallet_id).await,
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

    async fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<Wallet> {
        let mut retries = 0;
        loop {
            let wallet = self.ledger.live_wallet(wallet_id).await?;
            if wallet.status == status {
                return Ok(wallet);
            }
            let ops = vec![WriteOp::SetWalletStatus {
                wallet_id,
                expected_version: wallet.version,
                status,
            }];
            match self.ledger.commit(ops).await {
                Ok(()) => return self.get(wallet_id).await,
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

#[cfg(test)]
mod tests {
    use super::*;
    use paymesh_types::Money;
    use uuid::Uuid;

    fn store() -> WalletStore {
        WalletStore::new(Ledger::new())
    }

    #[tokio::test]
    async fn ensure_wallet_is_idempotent() {
        let store = store();
        let owner = Owner::agent(Uuid::now_v7());

        let first = store.ensure_wallet(owner, "USD").await.unwrap();
        let second = store.ensure_wallet(owner, "USD").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.balance, Money::ZERO);
    }

    #[tokio::test]
    async fn concurrent_ensure_creates_one_wallet() {
        let store = store();
        let owner = Owner::user(Uuid::now_v7());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.ensure_wallet(owner, "USD").await },
            ));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "all callers must get the same wallet");
    }

    #[tokio::test]
    async fn adjust_balance_round_trips() {
        let store = store();
        let wallet = store
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();

        let after = store
            .adjust_balance(
                wallet.id,
                Money::from_minor_units(10_000).amount(),
                Decimal::ZERO,
            )
            .await
            .unwrap();
        assert_eq!(after.balance, Money::from_minor_units(10_000));

        let err = store
            .adjust_balance(
                wallet.id,
                -Money::from_minor_units(20_000).amount(),
                Decimal::ZERO,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn freeze_unfreeze_cycle() {
        let store = store();
        let wallet = store
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();

        let frozen = store.freeze(wallet.id).await.unwrap();
        assert_eq!(frozen.status, WalletStatus::Frozen);
        // Idempotent.
        let again = store.freeze(wallet.id).await.unwrap();
        assert_eq!(again.version, frozen.version);

        let active = store.unfreeze(wallet.id).await.unwrap();
        assert_eq!(active.status, WalletStatus::Active);
    }

    #[tokio::test]
    async fn close_empty_wallet_and_recreate() {
        let store = store();
        let owner = Owner::agent(Uuid::now_v7());
        let wallet = store.ensure_wallet(owner, "USD").await.unwrap();

        let closed = store.close(wallet.id).await.unwrap();
        assert_eq!(closed.status, WalletStatus::Closed);

        // Closed rows behave as not-found for balance operations...
        let err = store
            .adjust_balance(wallet.id, Decimal::ONE, Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymeshError::WalletNotFound(_)));

        // ...but the owner can start over.
        let fresh = store.ensure_wallet(owner, "USD").await.unwrap();
        assert_ne!(fresh.id, wallet.id);
    }

    #[tokio::test]
    async fn close_nonempty_wallet_rejected() {
        let store = store();
        let wallet = store
            .ensure_wallet(Owner::user(Uuid::now_v7()), "USD")
            .await
            .unwrap();
        store
            .adjust_balance(wallet.id, Decimal::ONE, Decimal::ZERO)
            .await
            .unwrap();

        let err = store.close(wallet.id).await.unwrap_err();
        assert!(matches!(err, PaymeshError::WalletNotEmpty { .. }));
    }
}
