//! Pre-flight environment checks.
//!
//! Read-only predicates evaluated before any mutation. All of them run every
//! time so the operator gets the complete picture; the gate is the logical AND
//! of their results.

use std::fmt;

use tracing::{error, info, warn};

use stepwise_core::config::PreflightConfig;
use stepwise_core::error::Result;

use crate::db::SqlSession;

/// Exclusive backup mode, and these functions with it, is gone in PostgreSQL 15.
const BACKUP_SUPPORTED_SQL: &str =
    "SELECT (to_regproc('pg_catalog.pg_is_in_backup') IS NOT NULL)::text";

const BACKUP_SQL: &str = "SELECT pg_is_in_backup()::text, pg_backup_start_time()::text";

const CONNECTIONS_SQL: &str =
    "SELECT (SELECT count(*) FROM pg_stat_activity)::text, current_setting('max_connections')";

const SIZE_SQL: &str = r#"
SELECT pg_database_size(current_database())::text,
       pg_size_pretty(pg_database_size(current_database())),
       pg_size_pretty(COALESCE((SELECT sum(pg_total_relation_size(oid)) FROM pg_class WHERE relkind = 't'), 0)::bigint)
"#;

const RELATION_EXISTS_SQL: &str = "SELECT (to_regclass($1) IS NOT NULL)::text";

const SCHEMA_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = COALESCE(NULLIF($1, ''), current_schema()))::text";

const ROLE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)::text";

const EXTENSION_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = $1)::text";

/// The individual pre-flight checks, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightCheck {
    Backup,
    Connections,
    DiskSpace,
    ExistingObjects,
    Dependencies,
}

impl PreflightCheck {
    pub const ALL: [PreflightCheck; 5] = [
        PreflightCheck::Backup,
        PreflightCheck::Connections,
        PreflightCheck::DiskSpace,
        PreflightCheck::ExistingObjects,
        PreflightCheck::Dependencies,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PreflightCheck::Backup => "backup",
            PreflightCheck::Connections => "connections",
            PreflightCheck::DiskSpace => "disk space",
            PreflightCheck::ExistingObjects => "existing objects",
            PreflightCheck::Dependencies => "dependencies",
        }
    }
}

impl fmt::Display for PreflightCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub check: PreflightCheck,
    pub passed: bool,
    /// Diagnostic detail (sizes, counts, missing objects).
    pub message: Option<String>,
}

impl CheckResult {
    fn pass(check: PreflightCheck, message: Option<String>) -> Self {
        Self {
            check,
            passed: true,
            message,
        }
    }

    fn fail(check: PreflightCheck, message: impl Into<String>) -> Self {
        Self {
            check,
            passed: false,
            message: Some(message.into()),
        }
    }
}

/// Results of all pre-flight checks.
#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub results: Vec<CheckResult>,
}

impl PreflightReport {
    /// True only if every check passed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn get(&self, check: PreflightCheck) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.check == check)
    }
}

/// Runs the pre-flight checks against a session.
#[derive(Debug, Clone, Default)]
pub struct PreflightChecker {
    config: PreflightConfig,
}

impl PreflightChecker {
    pub fn new(config: PreflightConfig) -> Self {
        Self { config }
    }

    /// Run every check for `table_name`.
    ///
    /// A check whose query fails counts as failed; the remaining checks still
    /// run.
    pub async fn run_all<S>(&self, session: &mut S, table_name: &str) -> PreflightReport
    where
        S: SqlSession + ?Sized,
    {
        let mut report = PreflightReport::default();

        for check in PreflightCheck::ALL {
            let outcome = match check {
                PreflightCheck::Backup => self.check_backup(session).await,
                PreflightCheck::Connections => self.check_connections(session).await,
                PreflightCheck::DiskSpace => self.check_disk_space(session).await,
                PreflightCheck::ExistingObjects => {
                    self.check_existing_objects(session, table_name).await
                }
                PreflightCheck::Dependencies => self.check_dependencies(session, table_name).await,
            };

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    error!("Pre-flight check '{}' could not run: {}", check, e);
                    CheckResult::fail(check, e.to_string())
                }
            };

            if result.passed {
                match &result.message {
                    Some(msg) => info!("Pre-flight check '{}' passed: {}", check, msg),
                    None => info!("Pre-flight check '{}' passed", check),
                }
            }

            report.results.push(result);
        }

        if !report.passed() {
            let failed: Vec<_> = report.failures().map(|r| r.check.name()).collect();
            error!("Pre-flight checks failed: {}", failed.join(", "));
        }

        report
    }

    async fn check_backup<S>(&self, session: &mut S) -> Result<CheckResult>
    where
        S: SqlSession + ?Sized,
    {
        if !session.fetch_row(BACKUP_SUPPORTED_SQL, &[]).await?.bool(0)? {
            return Ok(CheckResult::pass(
                PreflightCheck::Backup,
                Some("exclusive backup mode not available".into()),
            ));
        }

        let row = session.fetch_row(BACKUP_SQL, &[]).await?;
        if row.bool(0)? {
            let since = row.text(1).unwrap_or("unknown");
            error!("System is in backup mode since {}", since);
            return Ok(CheckResult::fail(
                PreflightCheck::Backup,
                format!("backup in progress since {}", since),
            ));
        }
        Ok(CheckResult::pass(PreflightCheck::Backup, None))
    }

    async fn check_connections<S>(&self, session: &mut S) -> Result<CheckResult>
    where
        S: SqlSession + ?Sized,
    {
        let row = session.fetch_row(CONNECTIONS_SQL, &[]).await?;
        let active = row.i64(0)?;
        let max = row.i64(1)?;
        let usage = format!("{}/{} connections in use", active, max);

        if active as f64 > max as f64 * self.config.max_connection_usage {
            warn!("High connection usage: {}/{}", active, max);
            return Ok(CheckResult::fail(PreflightCheck::Connections, usage));
        }
        Ok(CheckResult::pass(PreflightCheck::Connections, Some(usage)))
    }

    async fn check_disk_space<S>(&self, session: &mut S) -> Result<CheckResult>
    where
        S: SqlSession + ?Sized,
    {
        let row = session.fetch_row(SIZE_SQL, &[]).await?;
        let db_bytes = row.i64(0)?;
        let db_size = row.text(1).unwrap_or("unknown");
        let toast_size = row.text(2).unwrap_or("unknown");
        let summary = format!("database size {}, TOAST size {}", db_size, toast_size);
        info!("Database size: {}, TOAST size: {}", db_size, toast_size);

        if let Some(limit_mb) = self.config.max_database_size_mb {
            let limit_bytes = limit_mb.saturating_mul(1024 * 1024);
            if db_bytes as u64 > limit_bytes {
                error!(
                    "Database size {} exceeds configured limit of {} MB",
                    db_size, limit_mb
                );
                return Ok(CheckResult::fail(
                    PreflightCheck::DiskSpace,
                    format!("{} exceeds limit of {} MB", summary, limit_mb),
                ));
            }
        }
        Ok(CheckResult::pass(PreflightCheck::DiskSpace, Some(summary)))
    }

    async fn check_existing_objects<S>(
        &self,
        session: &mut S,
        table_name: &str,
    ) -> Result<CheckResult>
    where
        S: SqlSession + ?Sized,
    {
        let exists = session
            .fetch_row(RELATION_EXISTS_SQL, &[table_name])
            .await?
            .bool(0)?;
        if exists {
            error!("Object {} already exists", table_name);
            return Ok(CheckResult::fail(
                PreflightCheck::ExistingObjects,
                format!("relation {} already exists", table_name),
            ));
        }
        Ok(CheckResult::pass(PreflightCheck::ExistingObjects, None))
    }

    async fn check_dependencies<S>(
        &self,
        session: &mut S,
        table_name: &str,
    ) -> Result<CheckResult>
    where
        S: SqlSession + ?Sized,
    {
        let mut missing = Vec::new();

        let schema = schema_of(table_name).unwrap_or("");
        if !session.fetch_row(SCHEMA_EXISTS_SQL, &[schema]).await?.bool(0)? {
            missing.push(if schema.is_empty() {
                "current schema".to_string()
            } else {
                format!("schema {}", schema)
            });
        }

        for role in &self.config.required_roles {
            if !session.fetch_row(ROLE_EXISTS_SQL, &[role.as_str()]).await?.bool(0)? {
                missing.push(format!("role {}", role));
            }
        }

        for table in &self.config.required_tables {
            if !session.fetch_row(RELATION_EXISTS_SQL, &[table.as_str()]).await?.bool(0)? {
                missing.push(format!("table {}", table));
            }
        }

        for extension in &self.config.required_extensions {
            if !session
                .fetch_row(EXTENSION_EXISTS_SQL, &[extension.as_str()])
                .await?
                .bool(0)?
            {
                missing.push(format!("extension {}", extension));
            }
        }

        if !missing.is_empty() {
            let message = format!("missing {}", missing.join(", "));
            error!("Dependency check failed: {}", message);
            return Ok(CheckResult::fail(PreflightCheck::Dependencies, message));
        }
        Ok(CheckResult::pass(PreflightCheck::Dependencies, None))
    }
}

/// Schema qualifier of a possibly qualified table name, without quotes.
fn schema_of(table_name: &str) -> Option<&str> {
    table_name
        .rsplit_once('.')
        .map(|(schema, _)| schema.trim_matches('"'))
}
