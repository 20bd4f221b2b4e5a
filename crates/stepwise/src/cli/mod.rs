mod check;
mod rollback;
mod run;

pub use check::CheckCommand;
pub use rollback::RollbackCommand;
pub use run::RunCommand;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use stepwise_core::config::StepwiseConfig;
use stepwise_runtime::migrations::{PreflightCheck, PreflightReport};

/// stepwise - step-by-step PostgreSQL migrations
#[derive(Parser)]
#[command(name = "stepwise")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (TOML, or JSON with a .json extension).
    #[arg(short, long, default_value = "stepwise.toml", global = true)]
    pub config: PathBuf,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run pre-flight checks, then apply a migration.
    Run(RunCommand),

    /// Run pre-flight checks only.
    Check(CheckCommand),

    /// Write the rollback script for a migration without touching the database.
    Rollback(RollbackCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<ExitCode> {
        match self.command {
            Commands::Run(cmd) => cmd.execute(&self.config).await,
            Commands::Check(cmd) => cmd.execute(&self.config).await,
            Commands::Rollback(cmd) => cmd.execute(),
        }
    }
}

/// Load `.env` and the configuration file.
fn load_config(path: &Path) -> Result<StepwiseConfig> {
    dotenvy::dotenv().ok();

    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }

    Ok(StepwiseConfig::from_file(path)?)
}

fn print_report(report: &PreflightReport) {
    for line in report_lines(report) {
        println!("{}", line);
    }
}

/// One line per check, in check order.
fn report_lines(report: &PreflightReport) -> Vec<String> {
    PreflightCheck::ALL
        .iter()
        .filter_map(|&check| report.get(check))
        .map(|result| {
            let marker = if result.passed {
                style("✓").green()
            } else {
                style("✗").red()
            };
            match &result.message {
                Some(message) => format!(
                    "  {} {} {}",
                    marker,
                    result.check,
                    style(format!("({})", message)).dim()
                ),
                None => format!("  {} {}", marker, result.check),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_runtime::migrations::CheckResult;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["stepwise", "run", "tickets.sql", "support.tickets"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("stepwise.toml"));
        match cli.command {
            Commands::Run(cmd) => {
                assert_eq!(cmd.migration, PathBuf::from("tickets.sql"));
                assert_eq!(cmd.table, "support.tickets");
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_parse_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["stepwise", "check", "tickets", "-c", "config.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
    }

    #[test]
    fn test_cli_run_requires_table() {
        let err = Cli::try_parse_from(["stepwise", "run", "tickets.sql"])
            .err()
            .unwrap();
        assert!(err.use_stderr());
    }

    #[test]
    fn test_cli_help_is_not_a_failure() {
        let err = Cli::try_parse_from(["stepwise", "--help"]).err().unwrap();
        assert!(!err.use_stderr());
    }

    #[test]
    fn test_report_lines_follow_check_order() {
        let report = PreflightReport {
            results: vec![
                CheckResult {
                    check: PreflightCheck::DiskSpace,
                    passed: false,
                    message: Some("over limit".into()),
                },
                CheckResult {
                    check: PreflightCheck::Backup,
                    passed: true,
                    message: None,
                },
            ],
        };

        let lines = report_lines(&report);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(&PreflightCheck::Backup.to_string()));
        assert!(lines[1].contains(&PreflightCheck::DiskSpace.to_string()));
        assert!(lines[1].contains("over limit"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/stepwise.toml")).unwrap_err();
        assert!(err.to_string().contains("Configuration file not found"));
    }
}
