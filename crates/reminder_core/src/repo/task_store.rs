//! Task store contract and SQLite key-value implementation.
//!
//! # Responsibility
//! - Persist the ordered task list under one fixed storage key.
//! - Serve consistent snapshots to concurrent readers.
//!
//! # Invariants
//! - Write paths call `Task::validate()` before any SQL mutation.
//! - The cached snapshot changes only after the SQL write committed, so a
//!   failed write never shows up as committed state.
//! - List order is creation order; `put` of an existing id keeps its slot.

use crate::db::DbError;
use crate::model::task::{Task, TaskId, TaskValidationError};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

/// Storage key holding the JSON task array.
pub const TASKS_STORAGE_KEY: &str = "tasks";

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable storage failure.
#[derive(Debug)]
pub enum StorageError {
    Validation(TaskValidationError),
    Db(DbError),
    Codec(serde_json::Error),
    InvalidData(String),
    Poisoned(&'static str),
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "task list codec error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted task data: {message}"),
            Self::Poisoned(what) => write!(f, "task store lock poisoned: {what}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Codec(err) => Some(err),
            Self::InvalidData(_) | Self::Poisoned(_) => None,
        }
    }
}

impl From<TaskValidationError> for StorageError {
    fn from(value: TaskValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable task persistence.
///
/// Every mutating call is durable before it returns.
pub trait TaskStore: Send + Sync {
    /// Returns all tasks in creation order.
    fn list(&self) -> StorageResult<Vec<Task>>;
    /// Returns one task by id.
    fn get(&self, id: TaskId) -> StorageResult<Option<Task>>;
    /// Inserts or replaces one task by id.
    fn put(&self, task: &Task) -> StorageResult<()>;
    /// Removes one task. Returns whether it existed.
    fn remove(&self, id: TaskId) -> StorageResult<bool>;
}

/// Encodes tasks into the persisted JSON array.
pub fn encode_tasks(tasks: &[Task]) -> StorageResult<String> {
    serde_json::to_string(tasks).map_err(StorageError::Codec)
}

/// Decodes the persisted JSON array.
///
/// Every record is validated; duplicate ids are rejected.
pub fn decode_tasks(raw: &str) -> StorageResult<Vec<Task>> {
    let tasks: Vec<Task> = serde_json::from_str(raw).map_err(StorageError::Codec)?;
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in &tasks {
        if !seen.insert(task.id) {
            return Err(StorageError::InvalidData(format!(
                "duplicate task id `{}` under key `{TASKS_STORAGE_KEY}`",
                task.id
            )));
        }
    }
    Ok(tasks)
}

/// SQLite-backed task store.
///
/// The task list is kept as one JSON value in `kv_store`. Writers serialize
/// on the connection mutex; readers use the cached snapshot.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
    snapshot: RwLock<Vec<Task>>,
}

impl SqliteTaskStore {
    /// Creates a store over a migrated connection and loads the current list.
    pub fn try_new(conn: Connection) -> StorageResult<Self> {
        let tasks = load_tasks(&conn)?;
        info!(
            "event=task_store_open module=repo status=ok task_count={}",
            tasks.len()
        );
        Ok(Self {
            conn: Mutex::new(conn),
            snapshot: RwLock::new(tasks),
        })
    }

    fn read_snapshot(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, Vec<Task>>> {
        self.snapshot
            .read()
            .map_err(|_| StorageError::Poisoned("snapshot"))
    }

    /// Applies `mutate` to a copy of the list, persists it, then publishes it.
    fn commit<T>(
        &self,
        op: &'static str,
        mutate: impl FnOnce(&mut Vec<Task>) -> T,
    ) -> StorageResult<T> {
        let started_at = Instant::now();
        let conn = self
            .conn
            .lock()
            .map_err(|_| StorageError::Poisoned("connection"))?;

        let mut next = self.read_snapshot()?.clone();
        let outcome = mutate(&mut next);
        let encoded = encode_tasks(&next)?;

        if let Err(err) = conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![TASKS_STORAGE_KEY, encoded],
        ) {
            error!(
                "event=task_store_write module=repo status=error op={op} duration_ms={} error_code=write_failed error={err}",
                started_at.elapsed().as_millis()
            );
            return Err(err.into());
        }

        *self
            .snapshot
            .write()
            .map_err(|_| StorageError::Poisoned("snapshot"))? = next;
        info!(
            "event=task_store_write module=repo status=ok op={op} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(outcome)
    }
}

impl TaskStore for SqliteTaskStore {
    fn list(&self) -> StorageResult<Vec<Task>> {
        Ok(self.read_snapshot()?.clone())
    }

    fn get(&self, id: TaskId) -> StorageResult<Option<Task>> {
        Ok(self
            .read_snapshot()?
            .iter()
            .find(|task| task.id == id)
            .cloned())
    }

    fn put(&self, task: &Task) -> StorageResult<()> {
        task.validate()?;
        self.commit("put", |tasks| {
            match tasks.iter_mut().find(|existing| existing.id == task.id) {
                Some(existing) => *existing = task.clone(),
                None => tasks.push(task.clone()),
            }
        })
    }

    fn remove(&self, id: TaskId) -> StorageResult<bool> {
        if self.get(id)?.is_none() {
            return Ok(false);
        }
        self.commit("remove", |tasks| {
            let before = tasks.len();
            tasks.retain(|task| task.id != id);
            tasks.len() != before
        })
    }
}

fn load_tasks(conn: &Connection) -> StorageResult<Vec<Task>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?1;",
            [TASKS_STORAGE_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => decode_tasks(&raw),
        None => Ok(Vec::new()),
    }
}
