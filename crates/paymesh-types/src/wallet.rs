//! Wallet model: the only shared mutable resource in the engine.
//!
//! A wallet belongs to exactly one principal (user or agent) and carries a
//! running `balance` and `reserved` total in a single fixed currency. Both
//! totals are derived caches over the journal — the transaction log is the
//! source of truth — and every mutation re-checks the core invariant:
//!
//! ```text
//! 0 <= reserved <= balance
//! ```
//!
//! `available = balance - reserved` is the only amount a debit or new hold
//! may draw from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Money, PaymeshError, Result, WalletId};

/// Currency code for a wallet (e.g., "USD"). Fixed for the wallet's lifetime.
pub type Currency = String;

/// The principal a wallet belongs to. Ownership is immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Owner {
    /// A human account.
    User(Uuid),
    /// An autonomous agent.
    Agent(Uuid),
}

impl Owner {
    #[must_use]
    pub fn user(id: Uuid) -> Self {
        Self::User(id)
    }

    #[must_use]
    pub fn agent(id: Uuid) -> Self {
        Self::Agent(id)
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Agent(id) => write!(f, "agent:{id}"),
        }
    }
}

/// Wallet lifecycle status.
///
/// FROZEN blocks **new** activity (fund/debit/hold) but lets in-flight holds
/// and escrows resolve, so a freeze can never strand counterparty funds.
/// CLOSED wallets are retained for audit and behave as not-found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletStatus {
    Active,
    Frozen,
    Closed,
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Frozen => write!(f, "FROZEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A wallet row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Globally unique wallet identifier.
    pub id: WalletId,
    /// The owning principal. Immutable.
    pub owner: Owner,
    /// Fixed currency code.
    pub currency: Currency,
    /// Total funds recorded.
    pub balance: Money,
    /// Funds currently held against future settlement.
    pub reserved: Money,
    /// Lifecycle status.
    pub status: WalletStatus,
    /// Optimistic-concurrency counter, bumped on every committed mutation.
    pub version: u64,
    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a fresh ACTIVE wallet with zero balances.
    #[must_use]
    pub fn new(owner: Owner, currency: Currency) -> Self {
        Self {
            id: WalletId::new(),
            owner,
            currency,
            balance: Money::ZERO,
            reserved: Money::ZERO,
            status: WalletStatus::Active,
            version: 0,
            created_at: Utc::now(),
        }
    }

    /// The only amount a debit or new hold may draw from.
    #[must_use]
    pub fn available(&self) -> Money {
        self.balance.saturating_sub(self.reserved)
    }

    /// Re-check the core invariant. `Money` is non-negative by construction,
    /// so the only thing that can break is `reserved <= balance`.
    ///
    /// # Errors
    /// Returns [`PaymeshError::InvariantViolation`] on breach.
    pub fn verify_invariant(&self) -> Result<()> {
        if self.reserved > self.balance {
            return Err(PaymeshError::InvariantViolation {
                reason: format!(
                    "wallet {}: reserved {} exceeds balance {}",
                    self.id, self.reserved, self.balance
                ),
            });
        }
        Ok(())
    }
}
