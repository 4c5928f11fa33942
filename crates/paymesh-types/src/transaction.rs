//! Journal row types: the append-only record of every balance-affecting event.
//!
//! The journal is the source of truth; wallet totals are a derived cache
//! that must always reconcile with it. Once written, a row's `amount`,
//! `kind`, and `wallet_id` never change — the only legal mutation is the
//! status transition of an in-flight reservation:
//!
//! ```text
//!   ┌─────────┐  settle   ┌─────────┐
//!   │ PENDING ├──────────▶│ SETTLED │
//!   └────┬────┘           └─────────┘
//!        │ cancel
//!        ▼
//!   ┌───────────┐
//!   │ CANCELLED │
//!   └───────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Money, TransactionId, WalletId};

/// What a journal row did to its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Funds entered the wallet.
    Credit,
    /// Funds left the wallet through the direct-debit path.
    Debit,
    /// Funds were reserved against future settlement. The only kind that
    /// is born PENDING.
    Hold,
    /// A hold concluded: SETTLED if the funds actually left, CANCELLED if
    /// they returned to the available balance.
    Release,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credit => write!(f, "CREDIT"),
            Self::Debit => write!(f, "DEBIT"),
            Self::Hold => write!(f, "HOLD"),
            Self::Release => write!(f, "RELEASE"),
        }
    }
}

/// Lifecycle status of a journal row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// An in-flight reservation.
    Pending,
    /// The movement happened and counts toward the wallet balance.
    Settled,
    /// The movement was abandoned and never touched the balance.
    Cancelled,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Settled => write!(f, "SETTLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// An immutable journal row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Globally unique row identifier.
    pub id: TransactionId,
    /// The wallet this row belongs to. Never changes.
    pub wallet_id: WalletId,
    /// The kind of movement. Never changes.
    pub kind: TransactionKind,
    /// Current status. The only mutable field.
    pub status: TransactionStatus,
    /// Absolute magnitude of the movement. Never changes.
    pub amount: Money,
    /// Caller-supplied correlation string (e.g., `execution:<id>`).
    pub reference: String,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
    /// When the row reached a terminal status, if it has.
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a new journal row. Rows born in a terminal status get their
    /// `settled_at` stamped at creation.
    #[must_use]
    pub fn new(
        wallet_id: WalletId,
        kind: TransactionKind,
        status: TransactionStatus,
        amount: Money,
        reference: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new(),
            wallet_id,
            kind,
            status,
            amount,
            reference: reference.into(),
            created_at: now,
            settled_at: (status != TransactionStatus::Pending).then_some(now),
        }
    }

    /// Can this row transition to the given status? Only PENDING holds and
    /// releases may move, and only to a terminal status.
    #[must_use]
    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        self.status == TransactionStatus::Pending
            && matches!(self.kind, TransactionKind::Hold | TransactionKind::Release)
            && matches!(
                to,
                TransactionStatus::Settled | TransactionStatus::Cancelled
            )
    }

    /// Signed effect of this row on the wallet's `balance`, used by
    /// reconciliation. Only SETTLED rows count; HOLD rows never touch the
    /// balance (they move `reserved` only).
    #[must_use]
    pub fn balance_effect(&self) -> rust_decimal::Decimal {
        if self.status != TransactionStatus::Settled {
            return rust_decimal::Decimal::ZERO;
        }
        match self.kind {
            TransactionKind::Credit => self.amount.amount(),
            TransactionKind::Debit | TransactionKind::Release => -self.amount.amount(),
            TransactionKind::Hold => rust_decimal::Decimal::ZERO,
        }
    }

    /// Whether this row currently reserves funds (a PENDING hold).
    #[must_use]
    pub fn reserves(&self) -> bool {
        self.kind == TransactionKind::Hold && self.status == TransactionStatus::Pending
    }
}
