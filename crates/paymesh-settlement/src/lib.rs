//! # paymesh-settlement
//!
//! **Orchestration Plane**: the two-wallet escrow state machine, the
//! external settlement API, and journal reconciliation.
//!
//! ## Architecture
//!
//! The orchestration plane sits on top of the storage plane and is the only
//! surface external collaborators call:
//! 1. **EscrowCoordinator**: hold-then-settle-or-cancel across two wallets,
//!    atomically — an escrowed amount moves fully or not at all
//! 2. **Settlement**: fund / debit / hold / release / cancel-hold plus the
//!    escrow operations, each one atomic unit of work
//! 3. **Reconciler**: verifies that every wallet's cached totals equal the
//!    sums over its journal rows
//!
//! ## Money Flow
//!
//! ```text
//! fund → CREDIT row          debit → DEBIT row
//! open_escrow → HOLD row + escrow HELD
//! settle_escrow → source RELEASE + destination CREDIT + escrow RELEASED
//! cancel_escrow → source RELEASE(cancelled) + escrow CANCELLED
//! ```
//!
//! No method returns success while leaving wallet totals inconsistent with
//! the transaction log.

pub mod api;
pub mod escrow;
pub mod reconcile;

pub use api::Settlement;
pub use escrow::EscrowCoordinator;
pub use reconcile::Reconciler;
