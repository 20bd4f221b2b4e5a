//! stepwise - step-by-step PostgreSQL migrations
//!
//! Runs a single migration file inside one transaction, verifying every step
//! against the catalog and rolling back to a savepoint on the first failure.

pub use stepwise_core::config::{self, StepwiseConfig};
pub use stepwise_core::error::{Result, StepwiseError};

pub use stepwise_runtime::db::{PgSession, SqlSession};
pub use stepwise_runtime::logging::Logging;
pub use stepwise_runtime::migrations;
