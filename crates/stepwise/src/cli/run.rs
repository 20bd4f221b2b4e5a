use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tracing::{info, warn};

use stepwise_core::config::PreflightConfig;
use stepwise_runtime::db::{PgSession, SqlSession};
use stepwise_runtime::logging::Logging;
use stepwise_runtime::migrations::{
    write_rollback, MigrationExecutor, MigrationOutcome, PreflightChecker, Verifier,
};

use super::{load_config, print_report};

/// Apply a migration file.
#[derive(Parser)]
pub struct RunCommand {
    /// Migration file with `-- Step: <label>` sections.
    pub migration: PathBuf,

    /// Table the migration creates (optionally schema-qualified).
    pub table: String,
}

/// How a run ended.
#[derive(Debug, PartialEq, Eq)]
enum RunResult {
    /// A pre-flight check failed; nothing was written or executed.
    PreflightFailed,
    Finished(MigrationOutcome),
    Interrupted,
}

impl RunResult {
    fn exit_code(&self) -> ExitCode {
        match self {
            RunResult::Finished(outcome) if outcome.succeeded() => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        }
    }
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self, config_path: &Path) -> Result<ExitCode> {
        let config = load_config(config_path)?;
        let _logging = Logging::init(&config.logging)?;

        let migration_sql = std::fs::read_to_string(&self.migration).with_context(|| {
            format!("Failed to read migration file {}", self.migration.display())
        })?;
        let verifier = Verifier::from_config(&config.verification)?;

        info!(
            "Starting migration {} for table {}",
            self.migration.display(),
            self.table
        );

        let mut session = PgSession::connect(&config.database).await?;
        let result = self
            .apply(&mut session, &config.preflight, verifier, &migration_sql)
            .await;
        session.close().await?;

        Ok(result?.exit_code())
    }

    /// Pre-flight gate, rollback script, then the migration itself.
    async fn apply<S>(
        &self,
        session: &mut S,
        preflight: &PreflightConfig,
        verifier: Verifier,
        migration_sql: &str,
    ) -> Result<RunResult>
    where
        S: SqlSession + ?Sized,
    {
        let report = PreflightChecker::new(preflight.clone())
            .run_all(session, &self.table)
            .await;
        print_report(&report);
        if !report.passed() {
            println!(
                "{}",
                style("Pre-flight checks failed. See logs for details.").red()
            );
            return Ok(RunResult::PreflightFailed);
        }

        let rollback_path = write_rollback(&self.migration, migration_sql)?;
        println!(
            "{} Rollback script generated: {}",
            style("✓").green(),
            rollback_path.display()
        );

        let executor = MigrationExecutor::new(verifier);
        let outcome = tokio::select! {
            outcome = executor.execute(session, migration_sql, &self.table) => Some(outcome),
            Ok(()) = tokio::signal::ctrl_c() => None,
        };

        let result = match outcome {
            Some(outcome) => {
                match &outcome {
                    MigrationOutcome::Committed { steps } => println!(
                        "{} Migration completed successfully ({} steps)",
                        style("✓").green(),
                        steps
                    ),
                    MigrationOutcome::RolledBack { failed_step, error } => {
                        if let Some(step) = failed_step {
                            println!("  {} {}: {}", style("✗").red(), step, style(error).dim());
                        }
                        println!(
                            "{}",
                            style("Migration failed. See logs for details.").red()
                        );
                        println!("Rollback script available at: {}", rollback_path.display());
                    }
                }
                RunResult::Finished(outcome)
            }
            None => {
                // The executor was dropped mid-transaction, which abandoned the
                // session; the server rolls back when the connection closes.
                warn!("Migration interrupted, transaction abandoned");
                println!("{}", style("Migration interrupted.").yellow());
                println!("Rollback script available at: {}", rollback_path.display());
                RunResult::Interrupted
            }
        };

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_runtime::testing::MockSession;

    const MIGRATION: &str = "-- Step: Create indexes\nCREATE INDEX tickets_id_idx ON tickets (id);\n-- Step: Enable RLS\nALTER TABLE tickets ENABLE ROW LEVEL SECURITY;\n";

    fn healthy() -> MockSession {
        MockSession::new()
            .with_row("to_regproc", ["true"])
            .with_row(r"pg_is_in_backup\(\)", ["false"])
            .with_row("pg_stat_activity", ["12", "100"])
            .with_row("pg_database_size", ["1048576", "1024 kB", "64 kB"])
            .with_row("to_regclass", ["false"])
            .with_row("pg_namespace", ["true"])
    }

    /// Catalog answers once the index and row security are in place.
    fn migrated(session: MockSession) -> MockSession {
        session
            .with_row("pg_index", ["true"])
            .with_row("relrowsecurity", ["true"])
            .with_row("set_config", ["tickets"])
    }

    fn command(dir: &tempfile::TempDir) -> RunCommand {
        let migration = dir.path().join("tickets.sql");
        std::fs::write(&migration, MIGRATION).unwrap();
        RunCommand {
            migration,
            table: "tickets".into(),
        }
    }

    #[tokio::test]
    async fn test_failed_preflight_executes_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = command(&dir);
        let mut session = healthy().with_row(r"pg_is_in_backup\(\)", ["true", "now"]);

        let result = cmd
            .apply(&mut session, &PreflightConfig::default(), Verifier::new("SELECT 1;"), MIGRATION)
            .await
            .unwrap();

        assert_eq!(result, RunResult::PreflightFailed);
        assert!(session.executed().is_empty());
        assert!(session.scripts().is_empty());
        assert!(!dir.path().join("tickets_rollback.sql").exists());
    }

    #[tokio::test]
    async fn test_successful_run_commits_and_writes_rollback() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = command(&dir);
        let mut session = migrated(healthy());

        let result = cmd
            .apply(&mut session, &PreflightConfig::default(), Verifier::new("SELECT 1;"), MIGRATION)
            .await
            .unwrap();

        assert_eq!(
            result,
            RunResult::Finished(MigrationOutcome::Committed { steps: 2 })
        );
        assert_eq!(session.committed().len(), 2);
        let rollback = std::fs::read_to_string(dir.path().join("tickets_rollback.sql")).unwrap();
        assert!(rollback.contains("DROP INDEX IF EXISTS tickets_id_idx;"));
        assert!(rollback.contains("ALTER TABLE tickets DISABLE ROW LEVEL SECURITY;"));
    }

    #[tokio::test]
    async fn test_failed_migration_keeps_rollback_script() {
        let dir = tempfile::TempDir::new().unwrap();
        let cmd = command(&dir);
        let mut session = migrated(healthy()).fail_on("CREATE INDEX");

        let result = cmd
            .apply(&mut session, &PreflightConfig::default(), Verifier::new("SELECT 1;"), MIGRATION)
            .await
            .unwrap();

        assert!(matches!(
            result,
            RunResult::Finished(MigrationOutcome::RolledBack { .. })
        ));
        assert!(session.committed().is_empty());
        assert!(dir.path().join("tickets_rollback.sql").exists());
    }
}
