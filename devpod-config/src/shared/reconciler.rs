use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Tunables of the replace and revert flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ReconcilerConfig {
    /// Namespace used for dev pods that do not declare one.
    pub namespace: String,
    /// Number of ms between two checks while waiting for cluster state.
    pub poll_interval_ms: u64,
    /// Maximum number of ms to wait for a deletion to complete.
    pub wait_timeout_ms: u64,
    /// Maximum number of times the replace flow is restarted after a conflicting create.
    pub max_replace_attempts: u32,
    /// Storage requested by dev pod volume claims without an explicit size.
    pub default_volume_size: String,
}

impl ReconcilerConfig {
    /// Validates the reconciler settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_replace_attempts == 0 {
            return Err(ValidationError::MaxReplaceAttemptsZero);
        }

        if self.poll_interval_ms == 0 {
            return Err(ValidationError::PollIntervalZero);
        }

        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            poll_interval_ms: 1_000,
            wait_timeout_ms: 120_000,
            max_replace_attempts: 3,
            default_volume_size: "10Gi".to_string(),
        }
    }
}
