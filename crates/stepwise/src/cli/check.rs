use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use console::style;

use stepwise_runtime::db::PgSession;
use stepwise_runtime::logging::Logging;
use stepwise_runtime::migrations::PreflightChecker;

use super::{load_config, print_report};

/// Run pre-flight checks for a table without migrating.
#[derive(Parser)]
pub struct CheckCommand {
    /// Table the migration would create.
    pub table: String,
}

impl CheckCommand {
    pub async fn execute(self, config_path: &Path) -> Result<ExitCode> {
        let config = load_config(config_path)?;
        let _logging = Logging::init(&config.logging)?;

        let mut session = PgSession::connect(&config.database).await?;
        let report = PreflightChecker::new(config.preflight.clone())
            .run_all(&mut session, &self.table)
            .await;
        session.close().await?;

        print_report(&report);

        if report.passed() {
            println!("{}", style("All pre-flight checks passed").green());
            Ok(ExitCode::SUCCESS)
        } else {
            println!(
                "{}",
                style("Pre-flight checks failed. See logs for details.").red()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
