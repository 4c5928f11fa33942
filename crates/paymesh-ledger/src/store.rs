//! The transactional store behind every settlement operation.
//!
//! All mutable state — wallet rows, the journal, escrow rows — lives behind
//! one [`Ledger`]. Mutations are expressed as a [`WriteSet`] of typed ops
//! and go through [`Ledger::commit`], which validates the entire set
//! against the current state (version guards, balance invariants, status
//! transition legality) and then applies it all or not at all. No await
//! point exists between validation and apply, so no concurrent reader can
//! ever observe a partial unit of work.
//!
//! Wallet rows carry an optimistic-concurrency `version`; a stale version
//! at commit time yields [`CommitError::Conflict`], which callers resolve
//! by re-reading and retrying.
//!
//! Journal immutability is enforced here by construction: no commit op can
//! touch a row's `amount`, `kind`, or `wallet_id` — the only journal
//! mutation that exists is the PENDING → terminal status transition.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, error};

use paymesh_types::{
    Escrow, EscrowId, EscrowStatus, Money, Owner, PaymeshError, Transaction, TransactionId,
    TransactionStatus, Wallet, WalletId, WalletStatus,
};

/// A typed mutation inside an atomic unit of work.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a fresh wallet. Fails if the owner already has a live wallet —
    /// the uniqueness constraint behind `ensure_wallet`.
    InsertWallet(Wallet),
    /// Apply balance/reserved deltas to a wallet, guarded by its version.
    /// The invariant `0 <= reserved <= balance` is re-checked against the
    /// hypothetical post-update row before anything is written.
    AdjustBalance {
        wallet_id: WalletId,
        expected_version: u64,
        balance_delta: Decimal,
        reserved_delta: Decimal,
    },
    /// Set a wallet's lifecycle status, guarded by its version.
    SetWalletStatus {
        wallet_id: WalletId,
        expected_version: u64,
        status: WalletStatus,
    },
    /// Append an immutable journal row.
    AppendTransaction(Transaction),
    /// Transition a PENDING journal row to a terminal status.
    TransitionTransaction {
        transaction_id: TransactionId,
        to: TransactionStatus,
    },
    /// Insert a new escrow row.
    InsertEscrow(Escrow),
    /// Transition an escrow row along its state machine.
    TransitionEscrow { escrow_id: EscrowId, to: EscrowStatus },
}

/// An atomic unit of work.
pub type WriteSet = Vec<WriteOp>;

/// Why a commit did not apply. In both cases nothing was written.
#[derive(Debug)]
pub enum CommitError {
    /// A version guard failed — a concurrent writer committed first.
    /// Re-read and retry.
    Conflict,
    /// Validation rejected the write set; surfaced to the caller typed.
    Rejected(PaymeshError),
}

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<WalletId, Wallet>,
    /// One live (non-CLOSED) wallet per owner.
    owner_index: HashMap<Owner, WalletId>,
    /// Append-only. Rows are never removed or rewritten.
    journal: Vec<Transaction>,
    journal_index: HashMap<TransactionId, usize>,
    escrows: HashMap<EscrowId, Escrow>,
}

/// The shared transactional store. Cheap to clone; all clones see the same
/// state.
#[derive(Clone, Default)]
pub struct Ledger {
    inner: Arc<RwLock<LedgerState>>,
}

impl Ledger {
    /// Create a new empty in-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------
    // Reads (snapshots)
    // -----------------------------------------------------------------

    /// Read a wallet row of any status.
    pub async fn wallet(&self, id: WalletId) -> Option<Wallet> {
        self.inner.read().await.wallets.get(&id).cloned()
    }

    /// Read a wallet row, treating missing and CLOSED rows as not found.
    ///
    /// # Errors
    /// Returns [`PaymeshError::WalletNotFound`] for both cases.
    pub async fn live_wallet(&self, id: WalletId) -> Result<Wallet, PaymeshError> {
        match self.wallet(id).await {
            Some(w) if w.status != WalletStatus::Closed => Ok(w),
            _ => Err(PaymeshError::WalletNotFound(id)),
        }
    }

    /// Read the live wallet for an owner, if one exists.
    pub async fn wallet_by_owner(&self, owner: &Owner) -> Option<Wallet> {
        let state = self.inner.read().await;
        let id = state.owner_index.get(owner)?;
        state.wallets.get(id).cloned()
    }

    /// All wallet rows, including CLOSED ones.
    pub async fn wallets(&self) -> Vec<Wallet> {
        self.inner.read().await.wallets.values().cloned().collect()
    }

    /// Read a journal row.
    pub async fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        let state = self.inner.read().await;
        state
            .journal_index
            .get(&id)
            .map(|idx| state.journal[*idx].clone())
    }

    /// All journal rows for a wallet, in insertion order.
    pub async fn transactions_for_wallet(&self, wallet_id: WalletId) -> Vec<Transaction> {
        self.inner
            .read()
            .await
            .journal
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect()
    }

    /// One consistent snapshot for the hold path: the live wallet plus any
    /// PENDING hold already recorded under the same reference (idempotent
    /// retry detection), taken under a single lock acquisition.
    ///
    /// # Errors
    /// Returns [`PaymeshError::WalletNotFound`] if the wallet is missing or
    /// CLOSED.
    pub async fn hold_snapshot(
        &self,
        wallet_id: WalletId,
        reference: &str,
    ) -> Result<(Wallet, Option<Transaction>), PaymeshError> {
        let state = self.inner.read().await;
        let wallet = match state.wallets.get(&wallet_id) {
            Some(w) if w.status != WalletStatus::Closed => w.clone(),
            _ => return Err(PaymeshError::WalletNotFound(wallet_id)),
        };
        let pending = state
            .journal
            .iter()
            .find(|t| t.wallet_id == wallet_id && t.reference == reference && t.reserves())
            .cloned();
        Ok((wallet, pending))
    }

    /// Read an escrow row.
    pub async fn escrow(&self, id: EscrowId) -> Option<Escrow> {
        self.inner.read().await.escrows.get(&id).cloned()
    }

    /// A HELD escrow already opened on this source wallet under the same
    /// reference, if any (idempotent retry detection for `open_escrow`).
    pub async fn find_held_escrow(&self, source: WalletId, reference: &str) -> Option<Escrow> {
        self.inner
            .read()
            .await
            .escrows
            .values()
            .find(|e| {
                e.source_wallet_id == source
                    && e.reference == reference
                    && e.status == EscrowStatus::Held
            })
            .cloned()
    }

    /// Number of journal rows.
    pub async fn journal_len(&self) -> usize {
        self.inner.read().await.journal.len()
    }

    /// Number of escrow rows.
    pub async fn escrow_count(&self) -> usize {
        self.inner.read().await.escrows.len()
    }

    // -----------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------

    /// Validate and apply an atomic unit of work.
    ///
    /// Validation runs first over the entire set; if any op fails, nothing
    /// is written and the whole commit returns the rejection. Version
    /// guards that fail return [`CommitError::Conflict`] instead, telling
    /// the caller to re-read and retry.
    ///
    /// # Errors
    /// [`CommitError::Conflict`] on a stale version guard,
    /// [`CommitError::Rejected`] when validation rejects the set.
    pub async fn commit(&self, ops: WriteSet) -> Result<(), CommitError> {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;

        // Phase 1 — validate the whole set against current state. Wallet
        // effects accumulate in a scratch copy so multi-op sets see their
        // own earlier deltas; versions are checked against the stored row.
        let mut scratch: HashMap<WalletId, Wallet> = HashMap::new();
        for op in &ops {
            match op {
                WriteOp::InsertWallet(wallet) => {
                    if state.owner_index.contains_key(&wallet.owner) {
                        return Err(CommitError::Rejected(PaymeshError::DuplicateWallet(
                            wallet.owner,
                        )));
                    }
                    if state.wallets.contains_key(&wallet.id) {
                        return Err(CommitError::Rejected(PaymeshError::Internal(format!(
                            "wallet id collision: {}",
                            wallet.id
                        ))));
                    }
                }
                WriteOp::AdjustBalance {
                    wallet_id,
                    expected_version,
                    balance_delta,
                    reserved_delta,
                } => {
                    let wallet = scratch_wallet(&mut scratch, &state.wallets, *wallet_id)?;
                    if wallet.version != *expected_version {
                        return Err(CommitError::Conflict);
                    }
                    let new_balance = wallet.balance.amount() + *balance_delta;
                    let new_reserved = wallet.reserved.amount() + *reserved_delta;
                    if new_reserved.is_sign_negative() {
                        let reason = format!(
                            "wallet {wallet_id}: reserved {} cannot absorb delta {reserved_delta}",
                            wallet.reserved
                        );
                        error!(wallet = %wallet_id, %reason, "invariant violation rejected");
                        return Err(CommitError::Rejected(PaymeshError::InvariantViolation {
                            reason,
                        }));
                    }
                    if new_balance.is_sign_negative() || new_reserved > new_balance {
                        // The amount the set tried to draw beyond availability.
                        let needed = (*reserved_delta).max(-*balance_delta).max(Decimal::ZERO);
                        return Err(CommitError::Rejected(PaymeshError::InsufficientFunds {
                            needed: Money::new(needed).unwrap_or(Money::ZERO),
                            available: wallet.available(),
                        }));
                    }
                    wallet.balance = Money::new(new_balance).map_err(CommitError::Rejected)?;
                    wallet.reserved = Money::new(new_reserved).map_err(CommitError::Rejected)?;
                }
                WriteOp::SetWalletStatus {
                    wallet_id,
                    expected_version,
                    status,
                } => {
                    let wallet = scratch_wallet(&mut scratch, &state.wallets, *wallet_id)?;
                    if wallet.version != *expected_version {
                        return Err(CommitError::Conflict);
                    }
                    if wallet.status == WalletStatus::Closed {
                        // Closed rows are immutable audit records.
                        return Err(CommitError::Rejected(PaymeshError::WalletNotFound(
                            *wallet_id,
                        )));
                    }
                    if *status == WalletStatus::Closed
                        && !(wallet.balance.is_zero() && wallet.reserved.is_zero())
                    {
                        return Err(CommitError::Rejected(PaymeshError::WalletNotEmpty {
                            wallet_id: *wallet_id,
                            balance: wallet.balance,
                            reserved: wallet.reserved,
                        }));
                    }
                    wallet.status = *status;
                }
                WriteOp::AppendTransaction(row) => {
                    if state.journal_index.contains_key(&row.id) {
                        return Err(CommitError::Rejected(PaymeshError::Internal(format!(
                            "journal id collision: {}",
                            row.id
                        ))));
                    }
                    if !state.wallets.contains_key(&row.wallet_id) {
                        return Err(CommitError::Rejected(PaymeshError::WalletNotFound(
                            row.wallet_id,
                        )));
                    }
                }
                WriteOp::TransitionTransaction { transaction_id, to } => {
                    let Some(idx) = state.journal_index.get(transaction_id) else {
                        return Err(CommitError::Rejected(PaymeshError::TransactionNotFound(
                            *transaction_id,
                        )));
                    };
                    let row = &state.journal[*idx];
                    if !row.can_transition_to(*to) {
                        return Err(CommitError::Rejected(PaymeshError::InvalidTransition {
                            transaction_id: *transaction_id,
                            from: row.status,
                            to: *to,
                        }));
                    }
                }
                WriteOp::InsertEscrow(escrow) => {
                    if state.escrows.contains_key(&escrow.id) {
                        return Err(CommitError::Rejected(PaymeshError::Internal(format!(
                            "escrow id collision: {}",
                            escrow.id
                        ))));
                    }
                }
                WriteOp::TransitionEscrow { escrow_id, to } => {
                    let Some(escrow) = state.escrows.get(escrow_id) else {
                        return Err(CommitError::Rejected(PaymeshError::EscrowNotFound(
                            *escrow_id,
                        )));
                    };
                    if !escrow.status.can_transition_to(*to) {
                        return Err(CommitError::Rejected(PaymeshError::InvalidEscrowState {
                            escrow_id: *escrow_id,
                            status: escrow.status,
                        }));
                    }
                }
            }
        }

        // Phase 2 — apply. Nothing below can fail.
        let now = Utc::now();
        let op_count = ops.len();
        for op in ops {
            match op {
                WriteOp::InsertWallet(wallet) => {
                    state.owner_index.insert(wallet.owner, wallet.id);
                    state.wallets.insert(wallet.id, wallet);
                }
                WriteOp::AppendTransaction(row) => {
                    state.journal_index.insert(row.id, state.journal.len());
                    state.journal.push(row);
                }
                WriteOp::TransitionTransaction { transaction_id, to } => {
                    if let Some(idx) = state.journal_index.get(&transaction_id) {
                        let row = &mut state.journal[*idx];
                        row.status = to;
                        row.settled_at = Some(now);
                    }
                }
                WriteOp::InsertEscrow(escrow) => {
                    state.escrows.insert(escrow.id, escrow);
                }
                WriteOp::TransitionEscrow { escrow_id, to } => {
                    if let Some(escrow) = state.escrows.get_mut(&escrow_id) {
                        escrow.status = to;
                        escrow.released_at = Some(now);
                    }
                }
                // Wallet effects were accumulated in scratch; written back below.
                WriteOp::AdjustBalance { .. } | WriteOp::SetWalletStatus { .. } => {}
            }
        }
        for (wallet_id, mut wallet) in scratch {
            wallet.version += 1;
            if wallet.status == WalletStatus::Closed
                && state.owner_index.get(&wallet.owner) == Some(&wallet_id)
            {
                state.owner_index.remove(&wallet.owner);
            }
            state.wallets.insert(wallet_id, wallet);
        }

        debug!(ops = op_count, "commit applied");
        Ok(())
    }
}

/// Fetch (or lazily copy) the scratch row for a wallet during validation.
fn scratch_wallet<'a>(
    scratch: &'a mut HashMap<WalletId, Wallet>,
    wallets: &HashMap<WalletId, Wallet>,
    wallet_id: WalletId,
) -> Result<&'a mut Wallet, CommitError> {
    if !scratch.contains_key(&wallet_id) {
        let Some(row) = wallets.get(&wallet_id) else {
            return Err(CommitError::Rejected(PaymeshError::WalletNotFound(
                wallet_id,
            )));
        };
        scratch.insert(wallet_id, row.clone());
    }
    scratch.get_mut(&wallet_id).ok_or_else(|| {
        CommitError::Rejected(PaymeshError::Internal(
            "scratch wallet missing after insert".into(),
        ))
    })
}
