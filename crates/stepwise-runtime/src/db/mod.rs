mod postgres;
mod session;

pub use postgres::PgSession;
pub use session::{parse_bool, ResultSet, SessionFuture, SqlSession, TextRow};
