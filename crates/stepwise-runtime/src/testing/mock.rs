//! In-memory SQL session for testing.

use regex::Regex;

use stepwise_core::error::{Result, StepwiseError};

use crate::db::{ResultSet, SessionFuture, SqlSession, TextRow};

/// Mock database session.
///
/// Simulates PostgreSQL transaction semantics closely enough to check what a
/// migration leaves behind: statements executed inside a transaction only
/// become visible in [`committed`](Self::committed) after `COMMIT`,
/// `ROLLBACK TO SAVEPOINT` discards work back to the savepoint, and a failed
/// statement aborts the transaction until it is rolled back.
///
/// Query responses and failures are matched by regex against the SQL text.
/// When several row patterns match, the most recently registered one wins.
///
/// # Example
///
/// ```ignore
/// let mut session = MockSession::new()
///     .with_row("pg_stat_activity", ["85", "100"])
///     .fail_on("CREATE INDEX");
/// ```
#[derive(Default)]
pub struct MockSession {
    rows: Vec<(Regex, TextRow)>,
    failures: Vec<Regex>,
    result_sets: Vec<ResultSet>,

    executed: Vec<String>,
    queries: Vec<(String, Vec<String>)>,
    scripts: Vec<String>,

    committed: Vec<String>,
    pending: Vec<String>,
    savepoints: Vec<(String, usize)>,
    in_transaction: bool,
    aborted: bool,
    abandoned: bool,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries matching `pattern` with a row of text values.
    pub fn with_row<I, S>(mut self, pattern: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row = TextRow(values.into_iter().map(|v| Some(v.into())).collect());
        self.rows.push((compile(pattern), row));
        self
    }

    /// Fail any statement or query matching `pattern`.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.failures.push(compile(pattern));
        self
    }

    /// Result sets returned by every script run.
    pub fn with_result_sets(mut self, sets: Vec<ResultSet>) -> Self {
        self.result_sets = sets;
        self
    }

    /// Every statement passed to `execute`, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Every `fetch_row` call with its parameters, in order.
    pub fn queries(&self) -> &[(String, Vec<String>)] {
        &self.queries
    }

    /// Every script passed to `fetch_result_sets`, in order.
    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    /// Statements whose effects were committed.
    pub fn committed(&self) -> &[String] {
        &self.committed
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    fn check_usable(&self, sql: &str) -> Result<()> {
        if self.abandoned {
            return Err(StepwiseError::InvalidState(
                "Database session was abandoned".into(),
            ));
        }
        if self.aborted {
            return Err(StepwiseError::Database(format!(
                "current transaction is aborted, commands ignored until end of transaction block: {}",
                sql
            )));
        }
        Ok(())
    }

    fn check_failure(&mut self, sql: &str) -> Result<()> {
        if self.failures.iter().any(|re| re.is_match(sql)) {
            if self.in_transaction {
                self.aborted = true;
            }
            return Err(StepwiseError::Database(format!(
                "mock failure executing: {}",
                sql
            )));
        }
        Ok(())
    }

    fn apply(&mut self, sql: &str) -> Result<()> {
        let normalized = sql.trim().trim_end_matches(';').trim().to_ascii_uppercase();

        if normalized == "BEGIN" {
            if self.in_transaction {
                return Err(StepwiseError::InvalidState(
                    "there is already a transaction in progress".into(),
                ));
            }
            self.in_transaction = true;
            self.pending.clear();
            self.savepoints.clear();
        } else if normalized == "COMMIT" {
            // COMMIT of an aborted transaction rolls it back.
            if !self.aborted {
                self.committed.append(&mut self.pending);
            }
            self.end_transaction();
        } else if normalized == "ROLLBACK" {
            self.end_transaction();
        } else if let Some(name) = normalized.strip_prefix("ROLLBACK TO SAVEPOINT ") {
            let name = name.trim().to_ascii_lowercase();
            let mark = self
                .savepoints
                .iter()
                .rev()
                .find(|(n, _)| *n == name)
                .map(|(_, mark)| *mark)
                .ok_or_else(|| {
                    StepwiseError::Database(format!("savepoint \"{}\" does not exist", name))
                })?;
            self.pending.truncate(mark);
            self.aborted = false;
        } else {
            self.check_usable(sql)?;
            if let Some(name) = normalized.strip_prefix("SAVEPOINT ") {
                self.savepoints
                    .push((name.trim().to_ascii_lowercase(), self.pending.len()));
            } else if self.in_transaction {
                self.pending.push(sql.to_string());
            } else {
                self.committed.push(sql.to_string());
            }
        }

        Ok(())
    }

    fn end_transaction(&mut self) {
        self.pending.clear();
        self.savepoints.clear();
        self.in_transaction = false;
        self.aborted = false;
    }
}

impl SqlSession for MockSession {
    fn execute<'a>(&'a mut self, sql: &'a str) -> SessionFuture<'a, ()> {
        Box::pin(async move {
            if self.abandoned {
                return Err(StepwiseError::InvalidState(
                    "Database session was abandoned".into(),
                ));
            }
            self.executed.push(sql.to_string());
            self.check_failure(sql)?;
            self.apply(sql)
        })
    }

    fn fetch_row<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [&'a str],
    ) -> SessionFuture<'a, TextRow> {
        Box::pin(async move {
            self.check_usable(sql)?;
            self.queries
                .push((sql.to_string(), params.iter().map(|p| p.to_string()).collect()));
            self.check_failure(sql)?;

            self.rows
                .iter()
                .rev()
                .find(|(re, _)| re.is_match(sql))
                .map(|(_, row)| row.clone())
                .ok_or_else(|| StepwiseError::Database(format!("no mock row for query: {}", sql)))
        })
    }

    fn fetch_result_sets<'a>(&'a mut self, sql: &'a str) -> SessionFuture<'a, Vec<ResultSet>> {
        Box::pin(async move {
            self.check_usable(sql)?;
            self.scripts.push(sql.to_string());
            self.check_failure(sql)?;
            Ok(self.result_sets.clone())
        })
    }

    fn abandon(&mut self) {
        self.abandoned = true;
        self.pending.clear();
        self.savepoints.clear();
        self.in_transaction = false;
        self.aborted = false;
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid mock pattern '{}': {}", pattern, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_statements_outside_transaction_commit_immediately() {
        let mut session = MockSession::new();
        session.execute("CREATE TABLE t (id int)").await.unwrap();
        assert_eq!(session.committed().len(), 1);
    }

    #[tokio::test]
    async fn test_aborted_transaction_rejects_statements() {
        let mut session = MockSession::new().fail_on("boom");
        session.execute("BEGIN").await.unwrap();
        assert!(session.execute("SELECT boom").await.is_err());
        assert!(session.execute("SELECT 1").await.is_err());
        session.execute("ROLLBACK").await.unwrap();
        assert!(session.execute("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_latest_row_pattern_wins() {
        let mut session = MockSession::new()
            .with_row("pg_stat_activity", ["1", "100"])
            .with_row("pg_stat_activity", ["99", "100"]);
        let row = session
            .fetch_row("SELECT count(*) FROM pg_stat_activity", &[])
            .await
            .unwrap();
        assert_eq!(row.text(0), Some("99"));
    }

    #[tokio::test]
    async fn test_unknown_savepoint_errors() {
        let mut session = MockSession::new();
        session.execute("BEGIN").await.unwrap();
        assert!(session.execute("ROLLBACK TO SAVEPOINT nope").await.is_err());
    }
}
