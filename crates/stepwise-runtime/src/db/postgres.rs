use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Either, Executor, Row, ValueRef};
use tracing::{debug, warn};

use stepwise_core::config::DatabaseConfig;
use stepwise_core::error::{Result, StepwiseError};

use super::session::{ResultSet, SessionFuture, SqlSession, TextRow};

/// A single PostgreSQL connection used for one migration run.
///
/// Migrations need one session for their whole lifetime (savepoints and
/// `SET LOCAL` are per-connection), so this wraps a bare connection rather
/// than a pool.
pub struct PgSession {
    conn: Option<PgConnection>,
}

impl PgSession {
    /// Connect using the configured parameters.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .application_name("stepwise");

        let mut conn = PgConnection::connect_with(&options).await.map_err(|e| {
            StepwiseError::Connection(format!(
                "Failed to connect to {}:{}/{}: {}",
                config.host, config.port, config.name, e
            ))
        })?;

        if let Some(secs) = config.statement_timeout_secs.filter(|s| *s > 0) {
            let sql = format!("SET statement_timeout = {}", secs * 1000);
            conn.execute(sqlx::raw_sql(&sql)).await.map_err(|e| {
                StepwiseError::Connection(format!("Failed to set statement timeout: {}", e))
            })?;
            debug!("Statement timeout set to {}s", secs);
        }

        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| StepwiseError::InvalidState("Database session was abandoned".into()))
    }

    /// Close the connection gracefully.
    pub async fn close(mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

impl SqlSession for PgSession {
    fn execute<'a>(&'a mut self, sql: &'a str) -> SessionFuture<'a, ()> {
        Box::pin(async move {
            let conn = self.conn()?;
            conn.execute(sqlx::raw_sql(sql))
                .await
                .map_err(|e| StepwiseError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn fetch_row<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [&'a str],
    ) -> SessionFuture<'a, TextRow> {
        Box::pin(async move {
            let conn = self.conn()?;
            let mut query = sqlx::query(sql);
            for param in params {
                query = query.bind(*param);
            }

            let row = query
                .fetch_one(conn)
                .await
                .map_err(|e| StepwiseError::Database(e.to_string()))?;

            let values = (0..row.len())
                .map(|i| row.try_get::<Option<String>, _>(i))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| StepwiseError::Database(e.to_string()))?;

            Ok(TextRow(values))
        })
    }

    fn fetch_result_sets<'a>(&'a mut self, sql: &'a str) -> SessionFuture<'a, Vec<ResultSet>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let mut stream = conn.fetch_many(sqlx::raw_sql(sql));

            let mut sets = Vec::new();
            let mut current = ResultSet::default();

            while let Some(item) = stream
                .try_next()
                .await
                .map_err(|e| StepwiseError::Database(e.to_string()))?
            {
                match item {
                    Either::Left(_) => {
                        if !current.columns.is_empty() {
                            sets.push(std::mem::take(&mut current));
                        }
                    }
                    Either::Right(row) => {
                        if current.columns.is_empty() {
                            current.columns =
                                row.columns().iter().map(|c| c.name().to_string()).collect();
                        }
                        current.rows.push(render_row(&row));
                    }
                }
            }

            if !current.columns.is_empty() {
                sets.push(current);
            }

            Ok(sets)
        })
    }

    fn abandon(&mut self) {
        if self.conn.take().is_some() {
            warn!("Abandoning database session; the server will roll back the open transaction");
        }
    }
}

/// Render every column of a simple-query row as text.
///
/// The simple-query protocol returns text-format values, so no type
/// information is needed.
fn render_row(row: &PgRow) -> Vec<Option<String>> {
    (0..row.len())
        .map(|i| match row.try_get_raw(i) {
            Ok(value) if !value.is_null() => value.as_str().ok().map(str::to_string),
            _ => None,
        })
        .collect()
}
