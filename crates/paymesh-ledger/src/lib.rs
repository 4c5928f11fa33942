//! # paymesh-ledger
//!
//! **Storage Plane**: versioned wallet rows, the append-only transaction
//! journal, escrow rows, and the atomic commit path that mutates them.
//!
//! ## Architecture
//!
//! The storage plane sits between the settlement API and the raw state:
//! 1. **Ledger**: the shared store — every mutation is a [`WriteSet`]
//!    validated and applied all-or-nothing under one writer lock
//! 2. **WalletStore**: wallet lifecycle and the `adjust_balance` contract
//! 3. **TransactionLog**: journal reads and PENDING-hold status transitions
//! 4. **HoldManager**: reserve / release / cancel against available balance
//!
//! ## Mutation Flow
//!
//! ```text
//! operation → snapshot (read lock) → plan WriteSet → Ledger::commit()
//!           → version guards + invariant re-checks → apply all or nothing
//! ```
//!
//! A failed version guard means a concurrent writer got there first; the
//! operation re-reads and retries a bounded number of times before
//! surfacing `Contention`.

pub mod holds;
pub mod journal;
pub mod store;
pub mod wallets;

pub use holds::{HoldManager, plan_cancel_hold, plan_hold, plan_release};
pub use journal::TransactionLog;
pub use store::{CommitError, Ledger, WriteOp, WriteSet};
pub use wallets::WalletStore;
