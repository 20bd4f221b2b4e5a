//! Migration pipeline: parsing, pre-flight, transactional execution,
//! verification and rollback generation.

mod executor;
mod parser;
mod preflight;
mod rollback;
mod sql;
mod step;
mod transaction;
mod verify;

pub use executor::{MigrationExecutor, MigrationOutcome, MigrationState};
pub use parser::{parse_steps, STEP_MARKER};
pub use preflight::{CheckResult, PreflightCheck, PreflightChecker, PreflightReport};
pub use rollback::{generate_rollback, rollback_path, write_rollback};
pub use sql::split_statements;
pub use step::{MigrationStep, StepKind};
pub use transaction::{TransactionGuard, MIGRATION_SAVEPOINT};
pub use verify::Verifier;
