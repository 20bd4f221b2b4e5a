use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use stepwise_runtime::migrations::write_rollback;

/// Generate the rollback script for a migration.
#[derive(Parser)]
pub struct RollbackCommand {
    /// Migration file with `-- Step: <label>` sections.
    pub migration: PathBuf,
}

impl RollbackCommand {
    pub fn execute(self) -> Result<ExitCode> {
        let migration_sql = std::fs::read_to_string(&self.migration).with_context(|| {
            format!("Failed to read migration file {}", self.migration.display())
        })?;

        let path = write_rollback(&self.migration, &migration_sql)?;
        println!(
            "{} Rollback script generated: {}",
            style("✓").green(),
            path.display()
        );

        Ok(ExitCode::SUCCESS)
    }
}
