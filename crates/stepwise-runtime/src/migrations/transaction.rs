use tracing::{debug, warn};

use stepwise_core::error::Result;

use crate::db::SqlSession;

/// Savepoint marking the pre-migration baseline.
pub const MIGRATION_SAVEPOINT: &str = "migration_start";

/// An open migration transaction with its baseline savepoint.
///
/// Resolved exactly once, by [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); both consume the guard. A guard dropped
/// unresolved (cancelled future, panic, failed resolution) abandons the
/// session so the server discards the transaction.
pub struct TransactionGuard<'s, S: SqlSession + ?Sized> {
    session: &'s mut S,
    resolved: bool,
}

impl<'s, S: SqlSession + ?Sized> TransactionGuard<'s, S> {
    /// `BEGIN` and set the baseline savepoint.
    pub async fn begin(session: &'s mut S) -> Result<Self> {
        session.execute("BEGIN").await?;

        let mut guard = Self {
            session,
            resolved: false,
        };

        let savepoint = format!("SAVEPOINT {}", MIGRATION_SAVEPOINT);
        if let Err(e) = guard.session.execute(&savepoint).await {
            if guard.session.execute("ROLLBACK").await.is_ok() {
                guard.resolved = true;
            }
            return Err(e);
        }

        debug!("Transaction open, savepoint {} set", MIGRATION_SAVEPOINT);
        Ok(guard)
    }

    /// The session running inside this transaction.
    pub fn session(&mut self) -> &mut S {
        &mut *self.session
    }

    /// Commit everything done since `begin`.
    pub async fn commit(mut self) -> Result<()> {
        self.session.execute("COMMIT").await?;
        self.resolved = true;
        debug!("Transaction committed");
        Ok(())
    }

    /// Discard everything done since the savepoint, then commit the now-empty
    /// transaction so the connection stays usable.
    pub async fn rollback(mut self) -> Result<()> {
        let rollback_to = format!("ROLLBACK TO SAVEPOINT {}", MIGRATION_SAVEPOINT);
        self.session.execute(&rollback_to).await?;
        self.session.execute("COMMIT").await?;
        self.resolved = true;
        debug!("Transaction rolled back to {}", MIGRATION_SAVEPOINT);
        Ok(())
    }
}

impl<S: SqlSession + ?Sized> Drop for TransactionGuard<'_, S> {
    fn drop(&mut self) {
        if !self.resolved {
            warn!("Migration transaction dropped without commit or rollback");
            self.session.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSession;

    #[tokio::test]
    async fn test_commit_persists_work() {
        let mut session = MockSession::new();
        {
            let mut guard = TransactionGuard::begin(&mut session).await.unwrap();
            guard
                .session()
                .execute("CREATE TABLE tickets (id int)")
                .await
                .unwrap();
            guard.commit().await.unwrap();
        }

        assert_eq!(session.committed(), &["CREATE TABLE tickets (id int)".to_string()]);
        assert!(!session.in_transaction());
        assert!(!session.is_abandoned());
    }

    #[tokio::test]
    async fn test_rollback_discards_work_and_closes_transaction() {
        let mut session = MockSession::new();
        {
            let mut guard = TransactionGuard::begin(&mut session).await.unwrap();
            guard
                .session()
                .execute("CREATE TABLE tickets (id int)")
                .await
                .unwrap();
            guard.rollback().await.unwrap();
        }

        assert!(session.committed().is_empty());
        assert!(!session.in_transaction());
        assert_eq!(
            session.executed(),
            &[
                "BEGIN".to_string(),
                "SAVEPOINT migration_start".to_string(),
                "CREATE TABLE tickets (id int)".to_string(),
                "ROLLBACK TO SAVEPOINT migration_start".to_string(),
                "COMMIT".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_recovers_aborted_transaction() {
        let mut session = MockSession::new().fail_on("CREATE INDEX");
        {
            let mut guard = TransactionGuard::begin(&mut session).await.unwrap();
            guard
                .session()
                .execute("CREATE TABLE tickets (id int)")
                .await
                .unwrap();
            assert!(guard
                .session()
                .execute("CREATE INDEX tickets_idx ON tickets (id)")
                .await
                .is_err());
            guard.rollback().await.unwrap();
        }

        assert!(session.committed().is_empty());
        assert!(!session.is_abandoned());
    }

    #[tokio::test]
    async fn test_unresolved_guard_abandons_session() {
        let mut session = MockSession::new();
        {
            let mut guard = TransactionGuard::begin(&mut session).await.unwrap();
            guard
                .session()
                .execute("CREATE TABLE tickets (id int)")
                .await
                .unwrap();
        }

        assert!(session.is_abandoned());
        assert!(session.committed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_abandons_session() {
        let mut session = MockSession::new().fail_on("ROLLBACK TO");
        {
            let guard = TransactionGuard::begin(&mut session).await.unwrap();
            assert!(guard.rollback().await.is_err());
        }

        assert!(session.is_abandoned());
    }

    #[tokio::test]
    async fn test_failed_savepoint_rolls_back() {
        let mut session = MockSession::new().fail_on("^SAVEPOINT");
        assert!(TransactionGuard::begin(&mut session).await.is_err());
        assert!(!session.in_transaction());
        assert!(!session.is_abandoned());
    }
}
