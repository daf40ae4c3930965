//! Process-wide engine runtime.
//!
//! # Responsibility
//! - Own the single `ReminderService` shared by FFI calls and the background
//!   hook.
//! - Provide explicit init (`ensure_configured`) and teardown (`shutdown`).
//!
//! # Invariants
//! - `ensure_configured` is idempotent for the same database path and
//!   rejects a different one while configured.
//! - `shutdown` drops in-process state only; platform-side registrations
//!   survive so the next reconcile can adopt or replace them.
//! - `clear_all` is the only teardown that cancels sink registrations.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::db::open_db;
use crate::error::{EngineError, EngineResult};
use crate::repo::task_store::{SqliteTaskStore, StorageError};
use crate::service::reminder_service::ReminderService;
use crate::sink::{GeofenceSink, NotificationSink};
use log::info;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

pub type SharedService = Arc<ReminderService<SqliteTaskStore>>;

/// Inputs for `ensure_configured`.
pub struct RuntimeOptions {
    pub db_path: PathBuf,
    pub config: EngineConfig,
    pub notifications: Arc<dyn NotificationSink>,
    pub geofences: Arc<dyn GeofenceSink>,
    pub clock: Arc<dyn Clock>,
}

impl RuntimeOptions {
    /// Options with default config and the system clock.
    pub fn new(
        db_path: impl Into<PathBuf>,
        notifications: Arc<dyn NotificationSink>,
        geofences: Arc<dyn GeofenceSink>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            config: EngineConfig::default(),
            notifications,
            geofences,
            clock: Arc::new(SystemClock),
        }
    }
}

struct RuntimeState {
    db_path: PathBuf,
    service: SharedService,
}

static RUNTIME: Lazy<Mutex<Option<RuntimeState>>> = Lazy::new(|| Mutex::new(None));

fn runtime() -> MutexGuard<'static, Option<RuntimeState>> {
    RUNTIME.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Configures the process runtime, or returns the existing service.
///
/// # Errors
/// - `AlreadyConfigured` when active with another database path.
/// - `Config` when `options.config` is invalid.
/// - `Storage` when the database cannot be opened or loaded.
pub fn ensure_configured(options: RuntimeOptions) -> EngineResult<SharedService> {
    let mut state = runtime();
    if let Some(active) = state.as_ref() {
        if active.db_path == options.db_path {
            return Ok(active.service.clone());
        }
        return Err(EngineError::AlreadyConfigured {
            active: active.db_path.clone(),
            requested: options.db_path,
        });
    }

    options.config.validate()?;
    let conn = open_db(&options.db_path).map_err(StorageError::from)?;
    let store = Arc::new(SqliteTaskStore::try_new(conn)?);
    let service = Arc::new(ReminderService::new(
        store,
        options.notifications,
        options.geofences,
        options.config,
        options.clock,
    ));

    info!(
        "event=runtime_configure module=runtime status=ok db_path={}",
        options.db_path.display()
    );
    *state = Some(RuntimeState {
        db_path: options.db_path,
        service: service.clone(),
    });
    Ok(service)
}

/// The configured service.
pub fn current() -> EngineResult<SharedService> {
    runtime()
        .as_ref()
        .map(|state| state.service.clone())
        .ok_or(EngineError::NotConfigured)
}

/// Database path of the configured runtime.
pub fn configured_db_path() -> Option<PathBuf> {
    runtime().as_ref().map(|state| state.db_path.clone())
}

/// Drops the process runtime. Returns whether one was configured.
pub fn shutdown() -> bool {
    let dropped = runtime().take().is_some();
    if dropped {
        info!("event=runtime_shutdown module=runtime status=ok");
    }
    dropped
}

/// Cancels every registered trigger of the configured service.
pub async fn clear_all() -> EngineResult<usize> {
    let service = current()?;
    Ok(service.clear_all().await)
}

#[cfg(test)]
mod tests {
    use super::{clear_all, configured_db_path, current, ensure_configured, shutdown, RuntimeOptions};
    use crate::error::EngineError;
    use crate::sink::memory::{MemoryGeofenceSink, MemoryNotificationSink};
    use std::sync::Arc;

    fn options(path: &std::path::Path) -> RuntimeOptions {
        RuntimeOptions::new(
            path,
            Arc::new(MemoryNotificationSink::new()),
            Arc::new(MemoryGeofenceSink::new()),
        )
    }

    // Single test: the runtime is process-global.
    #[tokio::test]
    async fn runtime_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.sqlite3");
        let second = dir.path().join("second.sqlite3");

        assert!(matches!(current(), Err(EngineError::NotConfigured)));
        assert!(matches!(clear_all().await, Err(EngineError::NotConfigured)));

        let service = ensure_configured(options(&first)).unwrap();
        let again = ensure_configured(options(&first)).unwrap();
        assert!(Arc::ptr_eq(&service, &again));
        assert_eq!(configured_db_path(), Some(first.clone()));

        let conflict = ensure_configured(options(&second)).err().expect("expected already_configured error");
        assert_eq!(conflict.code(), "already_configured");

        service.add_task("Water", i64::MAX, None).await.unwrap();
        assert_eq!(clear_all().await.unwrap(), 1);

        assert!(shutdown());
        assert!(!shutdown());
        drop((service, again));

        let reopened = ensure_configured(options(&second)).unwrap();
        assert!(reopened.list_tasks().unwrap().is_empty());
        assert!(shutdown());
    }
}
