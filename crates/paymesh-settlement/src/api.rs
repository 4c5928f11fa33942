//! The external settlement contract.
//!
//! [`Settlement`] is the only surface collaborators call — agent execution,
//! negotiation/outcome verification, and top-up billing all come through
//! here. Every method is one atomic unit of work against the storage
//! plane; any error response means **no funds moved**.
//!
//! `InsufficientFunds` and the state errors are caller-visible and never
//! retried here. Commit conflicts are retried internally (bounded by
//! [`EngineConfig::max_commit_retries`]) before surfacing `Contention`.

use paymesh_types::{
    EngineConfig, Escrow, EscrowId, Money, Owner, PaymeshError, Result, Transaction,
    TransactionKind, TransactionStatus, Wallet, WalletId, WalletStatus,
};
use rust_decimal::Decimal;
use tracing::{info, warn};

use paymesh_ledger::{CommitError, HoldManager, Ledger, TransactionLog, WalletStore, WriteOp};

use crate::escrow::EscrowCoordinator;

/// The settlement engine facade.
#[derive(Clone)]
pub struct Settlement {
    ledger: Ledger,
    wallets: WalletStore,
    journal: TransactionLog,
    holds: HoldManager,
    escrows: EscrowCoordinator,
    max_retries: u32,
}

impl Settlement {
    /// Create an engine over a fresh ledger with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine over a fresh ledger with the given configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let ledger = Ledger::new();
        Self {
            wallets: WalletStore::with_retries(ledger.clone(), config.max_commit_retries),
            journal: TransactionLog::new(ledger.clone()),
            holds: HoldManager::with_retries(ledger.clone(), config.max_commit_retries),
            escrows: EscrowCoordinator::with_retries(ledger.clone(), config.max_commit_retries),
            max_retries: config.max_commit_retries,
            ledger,
        }
    }

    /// The underlying ledger, for audit surfaces (e.g. the reconciler).
    #[must_use]
    pub fn ledger(&self) -> Ledger {
        self.ledger.clone()
    }

    // -----------------------------------------------------------------
    // Wallet surface
    // -----------------------------------------------------------------

    /// Get or lazily create the owner's wallet.
    ///
    /// # Errors
    /// Internal errors only; creation races are absorbed.
    pub async fn ensure_wallet(&self, owner: Owner, currency: &str) -> Result<Wallet> {
        self.wallets.ensure_wallet(owner, currency).await
    }

    /// Read a wallet row of any status.
    ///
    /// # Errors
    /// `WalletNotFound` if no such row exists.
    pub async fn wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.wallets.get(wallet_id).await
    }

    /// All journal rows for a wallet, oldest first.
    pub async fn transactions_for_wallet(&self, wallet_id: WalletId) -> Vec<Transaction> {
        self.journal.for_wallet(wallet_id).await
    }

    /// Freeze a wallet (admin). New activity is rejected; in-flight holds
    /// and escrows can still resolve.
    ///
    /// # Errors
    /// `WalletNotFound` or `Contention`.
    pub async fn freeze_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.wallets.freeze(wallet_id).await
    }

    /// Return a frozen wallet to ACTIVE (admin).
    ///
    /// # Errors
    /// `WalletNotFound` or `Contention`.
    pub async fn unfreeze_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.wallets.unfreeze(wallet_id).await
    }

    /// Close an empty wallet (admin). The row is retained for audit.
    ///
    /// # Errors
    /// `WalletNotFound`, `WalletNotEmpty`, or `Contention`.
    pub async fn close_wallet(&self, wallet_id: WalletId) -> Result<Wallet> {
        self.wallets.close(wallet_id).await
    }

    // -----------------------------------------------------------------
    // Single-wallet movements
    // -----------------------------------------------------------------

    /// Credit a wallet unconditionally. Called by the top-up collaborator
    /// **after** external payment is confirmed, never speculatively.
    ///
    /// # Errors
    /// `WalletNotFound`, `WalletFrozen`, `InvalidAmount`, or `Contention`.
    pub async fn fund(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        let result = self
            .single_movement(wallet_id, amount, reference, TransactionKind::Credit)
            .await;
        trace_outcome("fund", wallet_id, reference, &result);
        result
    }

    /// Debit a wallet from its available funds.
    ///
    /// # Errors
    /// `WalletNotFound`, `WalletFrozen`, `InvalidAmount`,
    /// `InsufficientFunds`, or `Contention`.
    pub async fn debit(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        let result = self
            .single_movement(wallet_id, amount, reference, TransactionKind::Debit)
            .await;
        trace_outcome("debit", wallet_id, reference, &result);
        result
    }

    async fn single_movement(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
        kind: TransactionKind,
    ) -> Result<Transaction> {
        if amount.is_zero() {
            return Err(PaymeshError::InvalidAmount {
                reason: format!("{kind} amount must be greater than zero"),
            });
        }
        let mut retries = 0;
        loop {
            let wallet = self.ledger.live_wallet(wallet_id).await?;
            if wallet.status == WalletStatus::Frozen {
                return Err(PaymeshError::WalletFrozen(wallet_id));
            }
            let balance_delta = match kind {
                TransactionKind::Credit => amount.amount(),
                _ => {
                    let available = wallet.available();
                    if amount > available {
                        return Err(PaymeshError::InsufficientFunds {
                            needed: amount,
                            available,
                        });
                    }
                    -amount.amount()
                }
            };
            let row = Transaction::new(
                wallet_id,
                kind,
                TransactionStatus::Settled,
                amount,
                reference,
            );
            let ops = vec![
                WriteOp::AdjustBalance {
                    wallet_id,
                    expected_version: wallet.version,
                    balance_delta,
                    reserved_delta: Decimal::ZERO,
                },
                WriteOp::AppendTransaction(row.clone()),
            ];
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

    // -----------------------------------------------------------------
    // Holds
    // -----------------------------------------------------------------

    /// Reserve funds against the wallet's available balance.
    ///
    /// # Errors
    /// See [`HoldManager::hold`].
    pub async fn hold(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        let result = self.holds.hold(wallet_id, amount, reference).await;
        trace_outcome("hold", wallet_id, reference, &result);
        result
    }

    /// Honor a hold: the reserved funds actually leave the wallet.
    ///
    /// # Errors
    /// See [`HoldManager::release`].
    pub async fn release(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        let result = self.holds.release(wallet_id, amount, reference).await;
        trace_outcome("release", wallet_id, reference, &result);
        result
    }

    /// Abandon a hold: the reserved funds return to availability.
    ///
    /// # Errors
    /// See [`HoldManager::cancel_hold`].
    pub async fn cancel_hold(
        &self,
        wallet_id: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Transaction> {
        let result = self.holds.cancel_hold(wallet_id, amount, reference).await;
        trace_outcome("cancel_hold", wallet_id, reference, &result);
        result
    }

    // -----------------------------------------------------------------
    // Escrow
    // -----------------------------------------------------------------

    /// Open an escrow from `source` toward `destination`.
    ///
    /// # Errors
    /// See [`EscrowCoordinator::open`].
    pub async fn open_escrow(
        &self,
        source: WalletId,
        destination: WalletId,
        amount: Money,
        reference: &str,
    ) -> Result<Escrow> {
        let result = self.escrows.open(source, destination, amount, reference).await;
        match &result {
            Ok(escrow) => info!(
                escrow = %escrow.id,
                source = %source,
                destination = %destination,
                amount = %amount,
                reference,
                "escrow opened"
            ),
            Err(e) => warn!(
                source = %source,
                destination = %destination,
                amount = %amount,
                reference,
                error = %e,
                "escrow open rejected"
            ),
        }
        result
    }

    /// Settle an escrow — the amount moves to the destination.
    ///
    /// # Errors
    /// See [`EscrowCoordinator::settle`].
    pub async fn settle_escrow(&self, escrow_id: EscrowId) -> Result<Escrow> {
        let result = self.escrows.settle(escrow_id).await;
        trace_escrow_outcome("settle_escrow", escrow_id, &result);
        result
    }

    /// Cancel an escrow — the amount returns to the source's availability.
    ///
    /// # Errors
    /// See [`EscrowCoordinator::cancel`].
    pub async fn cancel_escrow(&self, escrow_id: EscrowId) -> Result<Escrow> {
        let result = self.escrows.cancel(escrow_id).await;
        trace_escrow_outcome("cancel_escrow", escrow_id, &result);
        result
    }

    /// Read an escrow row.
    ///
    /// # Errors
    /// `EscrowNotFound` if no such row exists.
    pub async fn escrow(&self, escrow_id: EscrowId) -> Result<Escrow> {
        self.escrows.get(escrow_id).await
    }
}

impl Default for Settlement {
    fn default() -> Self {
        Self::new()
    }
}

fn trace_outcome(op: &'static str, wallet: WalletId, reference: &str, result: &Result<Transaction>) {
    match result {
        Ok(row) => info!(
            op,
            wallet = %wallet,
            transaction = %row.id,
            amount = %row.amount,
            reference,
            "settlement operation applied"
        ),
        Err(e) => warn!(
            op,
            wallet = %wallet,
            reference,
            error = %e,
            "settlement operation rejected"
        ),
    }
}

fn trace_escrow_outcome(op: &'static str, escrow_id: EscrowId, result: &Result<Escrow>) {
    match result {
        Ok(escrow) => info!(op, escrow = %escrow_id, status = %escrow.status, "escrow resolved"),
        Err(e) => warn!(op, escrow = %escrow_id, error = %e, "escrow operation rejected"),
    }
}
