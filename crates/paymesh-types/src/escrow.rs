//! # Escrow — the two-wallet hold-then-settle-or-cancel primitive
//!
//! An `Escrow` is a promise: funds are reserved on the source wallet and
//! will either move to the destination wallet (RELEASED) or return to the
//! source's available balance (CANCELLED). Never partially.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────┐   settle    ┌──────────┐
//!   │ HELD ├────────────▶│ RELEASED │
//!   └──┬───┘             └──────────┘
//!      │ cancel
//!      ▼
//!   ┌───────────┐
//!   │ CANCELLED │
//!   └───────────┘
//! ```
//!
//! RELEASED and CANCELLED are final — an escrow never transitions out of a
//! terminal state, which is what makes settlement retries safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EscrowId, Money, TransactionId, WalletId};

/// The lifecycle state of an escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// Funds are reserved on the source wallet.
    Held,
    /// Settlement moved the funds to the destination wallet. **Final.**
    Released,
    /// The escrow was abandoned; funds returned to the source's available
    /// balance. **Final.**
    Cancelled,
}

impl EscrowStatus {
    /// Can this escrow transition to the given target state?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Held, Self::Released | Self::Cancelled)
        )
    }

    /// Whether this state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Cancelled)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Held => write!(f, "HELD"),
            Self::Released => write!(f, "RELEASED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// An escrow row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    /// Globally unique escrow identifier.
    pub id: EscrowId,
    /// The wallet whose funds are reserved.
    pub source_wallet_id: WalletId,
    /// The wallet the funds move to on settlement.
    pub destination_wallet_id: WalletId,
    /// The escrowed amount.
    pub amount: Money,
    /// Current lifecycle state.
    pub status: EscrowStatus,
    /// The HOLD journal row on the source wallet backing this escrow.
    pub transaction_id: TransactionId,
    /// Caller-supplied correlation string, shared with the hold.
    pub reference: String,
    /// When the escrow was opened.
    pub created_at: DateTime<Utc>,
    /// When the escrow reached a terminal state, if it has.
    pub released_at: Option<DateTime<Utc>>,
}

impl Escrow {
    /// Create a new HELD escrow backed by the given HOLD row.
    #[must_use]
    pub fn new(
        source_wallet_id: WalletId,
        destination_wallet_id: WalletId,
        amount: Money,
        transaction_id: TransactionId,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            id: EscrowId::new(),
            source_wallet_id,
            destination_wallet_id,
            amount,
            status: EscrowStatus::Held,
            transaction_id,
            reference: reference.into(),
            created_at: Utc::now(),
            released_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_escrow() -> Escrow {
        Escrow::new(
            WalletId::new(),
            WalletId::new(),
            Money::from_minor_units(4_000),
            TransactionId::new(),
            "execution:1",
        )
    }

    #[test]
    fn state_transitions_valid() {
        assert!(EscrowStatus::Held.can_transition_to(EscrowStatus::Released));
        assert!(EscrowStatus::Held.can_transition_to(EscrowStatus::Cancelled));
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(!EscrowStatus::Released.can_transition_to(EscrowStatus::Held));
        assert!(!EscrowStatus::Released.can_transition_to(EscrowStatus::Cancelled));
        assert!(!EscrowStatus::Cancelled.can_transition_to(EscrowStatus::Held));
        assert!(!EscrowStatus::Cancelled.can_transition_to(EscrowStatus::Released));
    }

    #[test]
    fn is_terminal() {
        assert!(!EscrowStatus::Held.is_terminal());
        assert!(EscrowStatus::Released.is_terminal());
        assert!(EscrowStatus::Cancelled.is_terminal());
    }

    #[test]
    fn new_escrow_is_held() {
        let e = make_escrow();
        assert_eq!(e.status, EscrowStatus::Held);
        assert!(e.released_at.is_none());
    }

    #[test]
    fn status_display() {
        assert_eq!(EscrowStatus::Held.to_string(), "HELD");
        assert_eq!(EscrowStatus::Released.to_string(), "RELEASED");
        assert_eq!(EscrowStatus::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn serde_roundtrip() {
        let e = make_escrow();
        let json = serde_json::to_string(&e).unwrap();
        let back: Escrow = serde_json::from_str(&json).unwrap();
        assert_eq!(e.id, back.id);
        assert_eq!(e.amount, back.amount);
        assert_eq!(e.status, back.status);
    }
}
