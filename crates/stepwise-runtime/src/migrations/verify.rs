//! Per-step and whole-migration verification.
//!
//! Each template step has a catalog predicate confirming that the object it
//! was supposed to create exists for the target table. The final check runs
//! an external verification script with the table name exposed as the
//! transaction-local setting `migration.table_name`.

use std::path::Path;

use tracing::{debug, info, warn};

use stepwise_core::config::{UnknownStepPolicy, VerificationConfig};
use stepwise_core::error::{Result, StepwiseError};

use super::step::{MigrationStep, StepKind};
use crate::db::{parse_bool, SqlSession};

const TABLE_EXISTS_SQL: &str = "SELECT (to_regclass($1) IS NOT NULL)::text";

const CONSTRAINTS_EXIST_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_constraint WHERE conrelid = to_regclass($1))::text";

const INDEXES_EXIST_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_index WHERE indrelid = to_regclass($1))::text";

const PERMISSIONS_SET_SQL: &str = "SELECT COALESCE((SELECT relacl IS NOT NULL FROM pg_class WHERE oid = to_regclass($1)), false)::text";

const RLS_ENABLED_SQL: &str = "SELECT COALESCE((SELECT relrowsecurity FROM pg_class WHERE oid = to_regclass($1)), false)::text";

const POLICIES_EXIST_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_policy WHERE polrelid = to_regclass($1))::text";

const SET_TABLE_PARAM_SQL: &str = "SELECT set_config('migration.table_name', $1, true)";

/// Column a verification script can use to report a failed check.
const PASSED_COLUMN: &str = "passed";

/// Dispatches step verification and runs the final verification script.
#[derive(Debug, Clone)]
pub struct Verifier {
    script: String,
    unknown_steps: UnknownStepPolicy,
    require_passed: bool,
}

impl Verifier {
    /// Create a verifier with the given final verification script.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            unknown_steps: UnknownStepPolicy::Pass,
            require_passed: false,
        }
    }

    /// Build a verifier from configuration, reading the script from disk.
    pub fn from_config(config: &VerificationConfig) -> Result<Self> {
        let script = read_script(&config.script)?;
        Ok(Self::new(script)
            .with_unknown_steps(config.unknown_steps)
            .with_require_passed(config.require_passed))
    }

    pub fn with_unknown_steps(mut self, policy: UnknownStepPolicy) -> Self {
        self.unknown_steps = policy;
        self
    }

    pub fn with_require_passed(mut self, require_passed: bool) -> Self {
        self.require_passed = require_passed;
        self
    }

    /// Check that a step left the expected state behind for `table_name`.
    pub async fn verify_step<S>(
        &self,
        session: &mut S,
        step: &MigrationStep,
        table_name: &str,
    ) -> Result<bool>
    where
        S: SqlSession + ?Sized,
    {
        let sql = match step.kind() {
            StepKind::CreateBaseTable => TABLE_EXISTS_SQL,
            StepKind::AddConstraints => CONSTRAINTS_EXIST_SQL,
            StepKind::CreateIndexes => INDEXES_EXIST_SQL,
            StepKind::SetPermissions => PERMISSIONS_SET_SQL,
            StepKind::EnableRls => RLS_ENABLED_SQL,
            StepKind::CreatePolicies => POLICIES_EXIST_SQL,
            StepKind::Unknown(label) => {
                return Ok(match self.unknown_steps {
                    UnknownStepPolicy::Pass => {
                        warn!("No verification defined for step '{}', skipping", label);
                        true
                    }
                    UnknownStepPolicy::Fail => {
                        warn!("No verification defined for step '{}', failing", label);
                        false
                    }
                });
            }
        };

        let verified = session.fetch_row(sql, &[table_name]).await?.bool(0)?;
        debug!("Verification of '{}' on {}: {}", step.name, table_name, verified);
        Ok(verified)
    }

    /// Run the verification script against the migrated table.
    ///
    /// Every result set is logged. The script passes if it runs without
    /// error, unless `require_passed` is set, in which case any `passed`
    /// column holding false fails it.
    pub async fn verify_full<S>(&self, session: &mut S, table_name: &str) -> Result<()>
    where
        S: SqlSession + ?Sized,
    {
        session.fetch_row(SET_TABLE_PARAM_SQL, &[table_name]).await?;

        let result_sets = session.fetch_result_sets(&self.script).await?;

        let mut failed_checks = 0usize;
        for set in result_sets.iter().filter(|s| !s.is_empty()) {
            info!("Verification result ({}):", set.columns.join(", "));
            for row in &set.rows {
                let rendered: Vec<&str> = row
                    .iter()
                    .map(|v| v.as_deref().unwrap_or("NULL"))
                    .collect();
                info!("  {}", rendered.join(" | "));
            }

            failed_checks += set
                .column(PASSED_COLUMN)
                .filter(|v| v.and_then(parse_bool) == Some(false))
                .count();
        }

        if failed_checks > 0 {
            if self.require_passed {
                return Err(StepwiseError::Verification(format!(
                    "{} verification check(s) reported passed = false",
                    failed_checks
                )));
            }
            warn!(
                "{} verification check(s) reported passed = false (not enforced)",
                failed_checks
            );
        }

        Ok(())
    }
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        StepwiseError::Config(format!(
            "Failed to read verification script {}: {}",
            path.display(),
            e
        ))
    })
}
