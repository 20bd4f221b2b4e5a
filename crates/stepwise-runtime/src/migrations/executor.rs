use std::fmt;

use tracing::{debug, error, info, warn};

use stepwise_core::error::{Result, StepwiseError};

use super::parser::parse_steps;
use super::step::MigrationStep;
use super::transaction::TransactionGuard;
use super::verify::Verifier;
use crate::db::SqlSession;

/// Lifecycle of a single migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Idle,
    TransactionOpen,
    StepExecuting,
    Verifying,
    Committed,
    RolledBack,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationState::Idle => "idle",
            MigrationState::TransactionOpen => "transaction open",
            MigrationState::StepExecuting => "step executing",
            MigrationState::Verifying => "verifying",
            MigrationState::Committed => "committed",
            MigrationState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// Result of a migration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Every step ran and verified; the transaction was committed.
    Committed { steps: usize },
    /// The migration failed and its effects were discarded.
    RolledBack {
        /// Step that failed, `None` when the failure happened outside a step.
        failed_step: Option<String>,
        error: String,
    },
}

impl MigrationOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, MigrationOutcome::Committed { .. })
    }
}

/// A failure with the step it happened in.
struct StepFailure {
    step: Option<String>,
    error: StepwiseError,
}

impl StepFailure {
    fn outside_steps(error: StepwiseError) -> Self {
        Self { step: None, error }
    }
}

/// Runs a migration inside one transaction, verifying every step.
pub struct MigrationExecutor {
    verifier: Verifier,
}

impl MigrationExecutor {
    pub fn new(verifier: Verifier) -> Self {
        Self { verifier }
    }

    /// Execute `migration_sql` against `table_name`.
    ///
    /// Never returns an error: every failure is contained by the transaction
    /// and reported as [`MigrationOutcome::RolledBack`].
    pub async fn execute<S>(
        &self,
        session: &mut S,
        migration_sql: &str,
        table_name: &str,
    ) -> MigrationOutcome
    where
        S: SqlSession + ?Sized,
    {
        let steps = parse_steps(migration_sql);
        let mut state = MigrationState::Idle;

        let mut guard = match TransactionGuard::begin(session).await {
            Ok(guard) => guard,
            Err(e) => {
                error!("Migration failed: could not open transaction: {}", e);
                return MigrationOutcome::RolledBack {
                    failed_step: None,
                    error: e.to_string(),
                };
            }
        };
        transition(&mut state, MigrationState::TransactionOpen);

        let result = self
            .run_steps(guard.session(), &steps, table_name, &mut state)
            .await;

        match result {
            Ok(()) => match guard.commit().await {
                Ok(()) => {
                    transition(&mut state, MigrationState::Committed);
                    info!("Migration successfully completed");
                    MigrationOutcome::Committed { steps: steps.len() }
                }
                Err(e) => {
                    // The guard was consumed unresolved, so the session is gone
                    // and the server discards the transaction.
                    transition(&mut state, MigrationState::RolledBack);
                    error!("Migration failed: commit failed: {}", e);
                    MigrationOutcome::RolledBack {
                        failed_step: None,
                        error: e.to_string(),
                    }
                }
            },
            Err(failure) => {
                match &failure.step {
                    Some(step) => error!("Migration failed: step '{}': {}", step, failure.error),
                    None => error!("Migration failed: {}", failure.error),
                }

                if let Err(e) = guard.rollback().await {
                    warn!(
                        "Rollback to savepoint failed, abandoning session: {}",
                        e
                    );
                }
                transition(&mut state, MigrationState::RolledBack);

                MigrationOutcome::RolledBack {
                    failed_step: failure.step,
                    error: failure.error.to_string(),
                }
            }
        }
    }

    async fn run_steps<S>(
        &self,
        session: &mut S,
        steps: &[MigrationStep],
        table_name: &str,
        state: &mut MigrationState,
    ) -> std::result::Result<(), StepFailure>
    where
        S: SqlSession + ?Sized,
    {
        for step in steps {
            self.run_step(session, step, table_name, state)
                .await
                .map_err(|error| StepFailure {
                    step: Some(step.name.clone()),
                    error,
                })?;
        }

        transition(state, MigrationState::Verifying);
        self.verifier
            .verify_full(session, table_name)
            .await
            .map_err(StepFailure::outside_steps)
    }

    async fn run_step<S>(
        &self,
        session: &mut S,
        step: &MigrationStep,
        table_name: &str,
        state: &mut MigrationState,
    ) -> Result<()>
    where
        S: SqlSession + ?Sized,
    {
        transition(state, MigrationState::StepExecuting);
        info!("Executing step: {}", step.name);

        if step.body.trim().is_empty() {
            debug!("Step '{}' has no SQL", step.name);
        } else {
            session.execute(&step.body).await?;
        }

        transition(state, MigrationState::Verifying);
        if !self.verifier.verify_step(session, step, table_name).await? {
            return Err(StepwiseError::Verification(format!(
                "Step verification failed: {}",
                step.name
            )));
        }

        info!("Step completed and verified: {}", step.name);
        Ok(())
    }
}

fn transition(state: &mut MigrationState, next: MigrationState) {
    debug!("Migration state: {} -> {}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;

    const TWO_STEPS: &str = "-- Step: Create base table\nCREATE TABLE tickets (id int);\n-- Step: Create indexes\nCREATE INDEX tickets_id_idx ON tickets (id);\n";

    fn healthy() -> MockSession {
        MockSession::new()
            .with_row("to_regclass", ["true"])
            .with_row("pg_index", ["true"])
            .with_row("set_config", ["tickets"])
    }

    fn executor() -> MigrationExecutor {
        MigrationExecutor::new(Verifier::new("SELECT 1;"))
    }

    #[tokio::test]
    async fn test_successful_migration_commits() {
        let mut session = healthy();

        let outcome = executor().execute(&mut session, TWO_STEPS, "tickets").await;

        assert_eq!(outcome, MigrationOutcome::Committed { steps: 2 });
        assert!(outcome.succeeded());
        assert_eq!(session.committed().len(), 2);
        assert!(session.committed()[0].contains("CREATE TABLE tickets"));
        assert_eq!(session.executed().last().map(String::as_str), Some("COMMIT"));
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn test_failing_index_step_leaves_no_table() {
        let mut session = healthy().fail_on("CREATE INDEX");

        let outcome = executor().execute(&mut session, TWO_STEPS, "tickets").await;

        match &outcome {
            MigrationOutcome::RolledBack { failed_step, .. } => {
                assert_eq!(failed_step.as_deref(), Some("Create indexes"));
            }
            other => panic!("expected rollback, got {:?}", other),
        }
        assert!(session.committed().is_empty());
        assert!(!session.in_transaction());
        assert!(!session.is_abandoned());

        let tail: Vec<&str> = session
            .executed()
            .iter()
            .rev()
            .take(2)
            .map(String::as_str)
            .collect();
        assert_eq!(tail, vec!["COMMIT", "ROLLBACK TO SAVEPOINT migration_start"]);
    }

    #[tokio::test]
    async fn test_failed_verification_rolls_back() {
        let mut session = healthy().with_row("pg_index", ["false"]);

        let outcome = executor().execute(&mut session, TWO_STEPS, "tickets").await;

        match outcome {
            MigrationOutcome::RolledBack { failed_step, error } => {
                assert_eq!(failed_step.as_deref(), Some("Create indexes"));
                assert!(error.contains("verification"));
            }
            other => panic!("expected rollback, got {:?}", other),
        }
        assert!(session.committed().is_empty());
    }

    #[tokio::test]
    async fn test_final_verification_failure_rolls_back() {
        let mut session = healthy().fail_on("^SELECT 1;$");

        let outcome = executor().execute(&mut session, TWO_STEPS, "tickets").await;

        match outcome {
            MigrationOutcome::RolledBack { failed_step, .. } => assert!(failed_step.is_none()),
            other => panic!("expected rollback, got {:?}", other),
        }
        assert!(session.committed().is_empty());
        assert_eq!(session.scripts().len(), 1);
    }

    #[tokio::test]
    async fn test_later_steps_not_run_after_failure() {
        let mut session = healthy().fail_on("CREATE TABLE");

        executor().execute(&mut session, TWO_STEPS, "tickets").await;

        assert!(!session
            .executed()
            .iter()
            .any(|s| s.contains("CREATE INDEX")));
        assert!(session.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_abandons_session() {
        let mut session = healthy()
            .fail_on("CREATE INDEX")
            .fail_on("ROLLBACK TO");

        let outcome = executor().execute(&mut session, TWO_STEPS, "tickets").await;

        assert!(!outcome.succeeded());
        assert!(session.is_abandoned());
        assert!(session.committed().is_empty());
    }

    #[tokio::test]
    async fn test_empty_migration_still_verifies_and_commits() {
        let mut session = healthy();

        let outcome = executor().execute(&mut session, "", "tickets").await;

        assert_eq!(outcome, MigrationOutcome::Committed { steps: 0 });
        assert_eq!(session.scripts().len(), 1);
    }

    #[tokio::test]
    async fn test_begin_failure_reports_rollback() {
        let mut session = healthy().fail_on("^BEGIN$");

        let outcome = executor().execute(&mut session, TWO_STEPS, "tickets").await;

        assert!(!outcome.succeeded());
        assert_eq!(session.executed(), &["BEGIN".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_step_executes_without_verification() {
        let mut session = healthy();
        let sql = "-- Step: Backfill data\nUPDATE tickets SET id = id;\n";

        let outcome = executor().execute(&mut session, sql, "tickets").await;

        assert!(outcome.succeeded());
        assert_eq!(session.committed(), &["UPDATE tickets SET id = id;\n".to_string()]);
    }
}
