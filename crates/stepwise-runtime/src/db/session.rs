use std::future::Future;
use std::pin::Pin;

use stepwise_core::error::{Result, StepwiseError};

/// Boxed future returned by [`SqlSession`] methods.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A single database session.
///
/// Every component that talks to the database goes through this trait so the
/// pipeline can run against PostgreSQL or against the in-memory mock used in
/// tests. Calls are strictly sequential: each one is awaited before the next
/// is issued.
pub trait SqlSession: Send {
    /// Run one or more statements through the simple-query protocol.
    fn execute<'a>(&'a mut self, sql: &'a str) -> SessionFuture<'a, ()>;

    /// Run a parameterized query and return its first row.
    ///
    /// Parameters are bound as text. Queries are expected to cast every
    /// selected column to `text`.
    fn fetch_row<'a>(&'a mut self, sql: &'a str, params: &'a [&'a str])
        -> SessionFuture<'a, TextRow>;

    /// Run an opaque multi-statement script and collect every result set it
    /// returns, rendered as text.
    fn fetch_result_sets<'a>(&'a mut self, sql: &'a str) -> SessionFuture<'a, Vec<ResultSet>>;

    /// Give up on the session without resolving the open transaction.
    ///
    /// Called when a transaction guard is dropped unresolved. Implementations
    /// must make sure the server discards the transaction, e.g. by closing
    /// the connection.
    fn abandon(&mut self);
}

/// A row with every column rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextRow(pub Vec<Option<String>>);

impl TextRow {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self(values.into_iter().map(|v| v.map(Into::into)).collect())
    }

    /// Text value of a column, `None` for NULL or a missing column.
    pub fn text(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).and_then(|v| v.as_deref())
    }

    /// Boolean value of a column. NULL reads as false.
    pub fn bool(&self, idx: usize) -> Result<bool> {
        match self.text(idx) {
            None => Ok(false),
            Some(v) => parse_bool(v).ok_or_else(|| {
                StepwiseError::Database(format!("Expected boolean in column {}, got '{}'", idx, v))
            }),
        }
    }

    /// Integer value of a column.
    pub fn i64(&self, idx: usize) -> Result<i64> {
        let v = self.text(idx).ok_or_else(|| {
            StepwiseError::Database(format!("Expected integer in column {}, got NULL", idx))
        })?;
        v.trim().parse().map_err(|_| {
            StepwiseError::Database(format!("Expected integer in column {}, got '{}'", idx, v))
        })
    }
}

/// One result set returned by a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows, one text value per column.
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of the named column across all rows.
    pub fn column<'a>(&'a self, name: &str) -> impl Iterator<Item = Option<&'a str>> + 'a {
        let idx = self.columns.iter().position(|c| c == name);
        self.rows
            .iter()
            .filter_map(move |row| idx.map(|i| row.get(i).and_then(|v| v.as_deref())))
    }
}

/// Parse PostgreSQL's text rendering of a boolean.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
