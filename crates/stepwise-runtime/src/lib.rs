pub mod db;
pub mod logging;
pub mod migrations;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use db::{PgSession, SqlSession};
pub use logging::Logging;
pub use migrations::{
    MigrationExecutor, MigrationOutcome, PreflightChecker, PreflightReport, Verifier,
};
