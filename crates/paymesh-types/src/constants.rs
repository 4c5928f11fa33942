//! System-wide constants for the PayMesh settlement engine.

/// Decimal places carried by every [`crate::Money`] value.
pub const MONEY_SCALE: u32 = 2;

/// Default bound on optimistic-commit retries before an operation surfaces
/// [`crate::PaymeshError::Contention`].
pub const MAX_COMMIT_RETRIES: u32 = 4;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "PayMesh";
