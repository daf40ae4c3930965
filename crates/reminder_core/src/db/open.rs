//! Connection bootstrap for the reminder database.
//!
//! # Invariants
//! - Returned connections wait up to `BUSY_TIMEOUT` on a locked file.
//! - Returned connections are migrated to `latest_version()`.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating when missing) the reminder database at `path`.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_with("file", || Connection::open(path))
}

/// Opens a throwaway in-memory reminder database.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with("memory", Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let opened = open().map_err(DbError::from).and_then(|mut conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        apply_migrations(&mut conn)?;
        Ok(conn)
    });

    let duration_ms = started_at.elapsed().as_millis();
    match &opened {
        Ok(_) => info!("event=db_open module=db status=ok mode={mode} duration_ms={duration_ms}"),
        Err(err) => error!(
            "event=db_open module=db status=error mode={mode} duration_ms={duration_ms} error_code={} error={err}",
            err.code()
        ),
    }
    opened
}
