//! Fixed-scale money arithmetic.
//!
//! [`Money`] wraps a [`rust_decimal::Decimal`] that is never negative and
//! never carries more than [`constants::MONEY_SCALE`] decimal places.
//! Addition, subtraction, and comparison are exact; the only rounding point
//! in the engine is rate application ([`Money::apply_bps`]), which rounds
//! **half-up** to the stored scale.
//!
//! Signed values exist only as deltas inside the ledger commit math — the
//! public `Money` surface cannot represent them.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{PaymeshError, Result, constants};

/// A non-negative decimal amount with a fixed scale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero, in any currency.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a money value from a raw decimal.
    ///
    /// # Errors
    /// Returns [`PaymeshError::InvalidAmount`] if the value is negative or
    /// carries more than [`constants::MONEY_SCALE`] decimal places.
    pub fn new(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() {
            return Err(PaymeshError::InvalidAmount {
                reason: format!("amount must not be negative, got {value}"),
            });
        }
        if value.round_dp(constants::MONEY_SCALE) != value {
            return Err(PaymeshError::InvalidAmount {
                reason: format!(
                    "amount {value} exceeds {} decimal places",
                    constants::MONEY_SCALE
                ),
            });
        }
        Ok(Self(value))
    }

    /// Create a money value from minor units (e.g., cents for a 2-scale ledger).
    #[must_use]
    pub fn from_minor_units(minor: u64) -> Self {
        Self(Decimal::from(minor) / Decimal::from(10_u64.pow(constants::MONEY_SCALE)))
    }

    /// The underlying decimal value.
    #[must_use]
    pub fn amount(&self) -> Decimal {
        self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Exact addition.
    ///
    /// # Errors
    /// Returns [`PaymeshError::InvalidAmount`] on overflow.
    pub fn checked_add(self, other: Self) -> Result<Self> {
        let value = self
            .0
            .checked_add(other.0)
            .ok_or_else(|| PaymeshError::InvalidAmount {
                reason: "amount overflow".to_string(),
            })?;
        Ok(Self(value))
    }

    /// Exact subtraction.
    ///
    /// # Errors
    /// Returns [`PaymeshError::InvalidAmount`] if the result would be negative.
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        if other.0 > self.0 {
            return Err(PaymeshError::InvalidAmount {
                reason: format!("subtraction underflow: {self} - {other}"),
            });
        }
        Ok(Self(self.0 - other.0))
    }

    /// Subtraction clamped at zero. Used where the caller has already
    /// established the ordering invariant (e.g., `reserved <= balance`).
    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        if other.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - other.0)
        }
    }

    /// Multiply by basis points (100 bps = 1%), rounding **half-up** to the
    /// stored scale. This is the only rounding operation in the engine.
    ///
    /// # Errors
    /// Returns [`PaymeshError::InvalidAmount`] on overflow.
    pub fn apply_bps(self, bps: u32) -> Result<Self> {
        let raw = self
            .0
            .checked_mul(Decimal::from(bps))
            .ok_or_else(|| PaymeshError::InvalidAmount {
                reason: "amount overflow".to_string(),
            })?
            / Decimal::from(10_000_u32);
        Ok(Self(raw.round_dp_with_strategy(
            constants::MONEY_SCALE,
            RoundingStrategy::MidpointAwayFromZero,
        )))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.prec$}", self.0, prec = constants::MONEY_SCALE as usize)
    }
}
