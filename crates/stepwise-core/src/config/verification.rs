use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// SQL script run after all steps succeed. It reads the target table
    /// from `current_setting('migration.table_name')`.
    #[serde(default = "default_script")]
    pub script: PathBuf,

    /// What to do with steps whose label has no known verification.
    #[serde(default)]
    pub unknown_steps: UnknownStepPolicy,

    /// Fail the final verification when any result column named `passed`
    /// is false. Off by default: the script only has to run without error.
    #[serde(default)]
    pub require_passed: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            script: default_script(),
            unknown_steps: UnknownStepPolicy::default(),
            require_passed: false,
        }
    }
}

fn default_script() -> PathBuf {
    PathBuf::from("verify_migration.sql")
}

/// Verification outcome for steps outside the known template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownStepPolicy {
    /// Treat as verified.
    #[default]
    Pass,
    /// Treat as failed.
    Fail,
}
