//! Configuration for the settlement engine.

use serde::{Deserialize, Serialize};

use crate::constants;

/// Engine-level tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many times an operation re-reads and retries after a commit
    /// conflict before surfacing [`crate::PaymeshError::Contention`].
    pub max_commit_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: constants::MAX_COMMIT_RETRIES,
        }
    }
}
