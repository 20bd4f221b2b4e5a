//! Testing utilities for migration code.
//!
//! [`MockSession`] stands in for a PostgreSQL connection so the pipeline can
//! be exercised without a database.

mod mock;

pub use mock::MockSession;
