//! Reminder database bootstrap.
//!
//! The task store keeps its whole task list in one `kv_store` row, so this
//! module only has to hand out a migrated connection and say why it could
//! not.
//!
//! # Invariants
//! - Schema version lives in `PRAGMA user_version`.
//! - A database written by a newer build is refused, never downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file carries a schema version this build does not know.
    SchemaTooNew { found: u32, supported: u32 },
}

impl DbError {
    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite_error",
            Self::SchemaTooNew { .. } => "schema_too_new",
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "reminder database error: {err}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "reminder database schema v{found} is newer than this build (v{supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
