//! Engine configuration.

use serde::{Deserialize, Serialize};

const fn default_max_shells() -> usize {
    256
}

/// Limits applied by the shell engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of live shells. Creation beyond this fails with
    /// `ResourceExhausted`.
    #[serde(default = "default_max_shells")]
    pub max_shells: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_shells: default_max_shells(),
        }
    }
}
