//! # paymesh-types
//!
//! Shared types, errors, and configuration for the **PayMesh** wallet ledger
//! and escrow settlement engine.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`WalletId`], [`TransactionId`], [`EscrowId`]
//! - **Money**: [`Money`], the fixed-scale non-negative decimal amount
//! - **Wallet model**: [`Wallet`], [`WalletStatus`], [`Owner`], [`Currency`]
//! - **Transaction model**: [`Transaction`], [`TransactionKind`], [`TransactionStatus`]
//! - **Escrow model**: [`Escrow`], [`EscrowStatus`]
//! - **Configuration**: [`EngineConfig`]
//! - **Errors**: [`PaymeshError`] with `PM_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod money;
pub mod transaction;
pub mod wallet;

// Re-export all primary types at crate root for ergonomic imports:
//   use paymesh_types::{Wallet, Money, Transaction, Escrow, ...};

pub use config::*;
pub use error::*;
pub use escrow::*;
pub use ids::*;
pub use money::*;
pub use transaction::*;
pub use wallet::*;

// Constants are accessed via `paymesh_types::constants::FOO`
// (not re-exported to avoid name collisions).
