#![allow(dead_code)]

use async_trait::async_trait;
use reminder_core::db::open_db_in_memory;
use reminder_core::sink::memory::{MemoryGeofenceSink, MemoryNotificationSink};
use reminder_core::{
    EngineConfig, ManualClock, NotificationHandle, NotificationPayload, NotificationSink,
    ReminderService, ScheduledNotification, SinkResult, SqliteTaskStore, StorageError,
    StorageResult, Task, TaskId, TaskStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

pub const NOW: i64 = 1_700_000_000_000;
pub const MINUTE_MS: i64 = 60_000;

pub struct Harness {
    pub service: Arc<ReminderService<SqliteTaskStore>>,
    pub store: Arc<SqliteTaskStore>,
    pub notifications: Arc<MemoryNotificationSink>,
    pub geofences: Arc<MemoryGeofenceSink>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(
        EngineConfig::default(),
        MemoryNotificationSink::new(),
        MemoryGeofenceSink::new(),
    )
}

pub fn harness_with(
    config: EngineConfig,
    notifications: MemoryNotificationSink,
    geofences: MemoryGeofenceSink,
) -> Harness {
    let store = Arc::new(SqliteTaskStore::try_new(open_db_in_memory().unwrap()).unwrap());
    let notifications = Arc::new(notifications);
    let geofences = Arc::new(geofences);
    let clock = Arc::new(ManualClock::new(NOW));
    let service = Arc::new(ReminderService::new(
        store.clone(),
        notifications.clone(),
        geofences.clone(),
        config,
        clock.clone(),
    ));
    Harness {
        service,
        store,
        notifications,
        geofences,
        clock,
    }
}

/// Notification sink that parks every `schedule_at` until released.
pub struct GatedNotificationSink {
    pub inner: MemoryNotificationSink,
    pub started: Notify,
    pub gate: Semaphore,
}

impl GatedNotificationSink {
    pub fn new() -> Self {
        Self {
            inner: MemoryNotificationSink::new(),
            started: Notify::new(),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl NotificationSink for GatedNotificationSink {
    async fn schedule_at(
        &self,
        task_id: TaskId,
        fire_at_ms: i64,
        payload: &NotificationPayload,
    ) -> SinkResult<NotificationHandle> {
        self.started.notify_one();
        let permit = self.gate.acquire().await.unwrap();
        permit.forget();
        self.inner.schedule_at(task_id, fire_at_ms, payload).await
    }

    async fn present_now(&self, payload: &NotificationPayload) -> SinkResult<()> {
        self.inner.present_now(payload).await
    }

    async fn cancel(&self, handle: &NotificationHandle) -> SinkResult<()> {
        self.inner.cancel(handle).await
    }

    async fn list_scheduled(&self) -> SinkResult<Option<Vec<ScheduledNotification>>> {
        self.inner.list_scheduled().await
    }
}

/// Store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub tasks: std::sync::Mutex<Vec<Task>>,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidData("write rejected".to_string()));
        }
        Ok(())
    }
}

impl TaskStore for FlakyStore {
    fn list(&self) -> StorageResult<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().clone())
    }

    fn get(&self, id: TaskId) -> StorageResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().iter().find(|task| task.id == id).cloned())
    }

    fn put(&self, task: &Task) -> StorageResult<()> {
        self.check()?;
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        Ok(())
    }

    fn remove(&self, id: TaskId) -> StorageResult<bool> {
        self.check()?;
        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        Ok(tasks.len() != before)
    }
}
