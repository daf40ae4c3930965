//! Task use-case service.
//!
//! # Responsibility
//! - Provide the add/update/delete/toggle/rename/list entry points for UI
//!   callers.
//! - Persist first, then let the scheduler re-apply triggers from the store.
//!
//! # Invariants
//! - Validation failures never reach the store.
//! - A failed store write leaves both the store and the triggers untouched.
//! - Every mutation runs under the scheduler's per-task guard, so the store
//!   write and the trigger diff of one task are never interleaved with
//!   another mutation of the same task.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::task::{GeoPoint, Task, TaskId, TaskPatch, TaskValidationError};
use crate::repo::task_store::TaskStore;
use crate::scheduler::{ArrivalOutcome, ReconcileSummary, ScheduleReport, Scheduler};
use crate::sink::{GeofenceSink, NotificationSink};
use log::{info, warn};
use std::sync::Arc;

/// Stored task plus the trigger state it ended up with.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReceipt {
    pub task: Task,
    pub report: ScheduleReport,
}

/// Use-case facade over task store and scheduler.
pub struct ReminderService<S: TaskStore> {
    scheduler: Scheduler<S>,
}

impl<S: TaskStore> ReminderService<S> {
    pub fn new(
        store: Arc<S>,
        notifications: Arc<dyn NotificationSink>,
        geofences: Arc<dyn GeofenceSink>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler: Scheduler::new(store, notifications, geofences, config, clock),
        }
    }

    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    /// Creates and stores a task, then arms its triggers.
    ///
    /// # Contract
    /// - Name is trimmed and must not be empty.
    /// - A past `dueAt` is stored and reported through `report.past_due`,
    ///   unless `reject_past_due_on_create` is set.
    pub async fn add_task(
        &self,
        name: &str,
        due_at_ms: i64,
        location: Option<GeoPoint>,
    ) -> EngineResult<TaskReceipt> {
        let task = Task::new(name, due_at_ms, location)?;
        let now_ms = self.scheduler.now_ms();
        if self.scheduler.config().reject_past_due_on_create && due_at_ms <= now_ms {
            return Err(TaskValidationError::PastDue { due_at_ms, now_ms }.into());
        }

        let _guard = self.scheduler.lock_task(task.id).await;
        self.scheduler.store().put(&task).map_err(|err| {
            warn!("event=task_add module=service status=error task_id={} error={err}", task.id);
            EngineError::from(err)
        })?;
        let report = self.scheduler.sync_locked(task.id).await?;
        info!(
            "event=task_add module=service status=ok task_id={} has_location={}",
            task.id,
            task.location.is_some()
        );
        Ok(TaskReceipt { task, report })
    }

    /// Applies a partial update and re-arms triggers.
    pub async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> EngineResult<TaskReceipt> {
        let _guard = self.scheduler.lock_task(id).await;
        let current = self.scheduler.store().get(id)?.ok_or(EngineError::NotFound(id))?;
        let task = current.patched(patch)?;
        if task != current {
            self.scheduler.store().put(&task)?;
        }
        let report = self.scheduler.sync_locked(id).await?;
        info!("event=task_update module=service status=ok task_id={id}");
        Ok(TaskReceipt { task, report })
    }

    /// Renames a task. An armed time trigger is re-armed with the new text.
    pub async fn rename_task(&self, id: TaskId, name: &str) -> EngineResult<TaskReceipt> {
        self.update_task(id, &TaskPatch::rename(name)).await
    }

    /// Flips `completed`. Completing cancels every trigger; reopening
    /// re-arms whatever is still in the future.
    pub async fn toggle_completion(&self, id: TaskId) -> EngineResult<TaskReceipt> {
        let _guard = self.scheduler.lock_task(id).await;
        let task = self
            .scheduler
            .store()
            .get(id)?
            .ok_or(EngineError::NotFound(id))?
            .toggled();
        self.scheduler.store().put(&task)?;
        let report = self.scheduler.sync_locked(id).await?;
        info!(
            "event=task_toggle module=service status=ok task_id={id} completed={}",
            task.completed
        );
        Ok(TaskReceipt { task, report })
    }

    /// Deletes a task and cancels all of its triggers.
    ///
    /// Unknown ids return `NotFound`; any stray trigger for them is still
    /// cancelled.
    pub async fn delete_task(&self, id: TaskId) -> EngineResult<ScheduleReport> {
        let existed = {
            let _guard = self.scheduler.lock_task(id).await;
            self.scheduler.store().remove(id)?
        };
        let report = self.scheduler.on_task_deleted(id).await;
        if !existed {
            return Err(EngineError::NotFound(id));
        }
        info!("event=task_delete module=service status=ok task_id={id}");
        Ok(report)
    }

    /// All tasks in creation order.
    pub fn list_tasks(&self) -> EngineResult<Vec<Task>> {
        Ok(self.scheduler.store().list()?)
    }

    pub fn get_task(&self, id: TaskId) -> EngineResult<Task> {
        self.scheduler
            .store()
            .get(id)?
            .ok_or(EngineError::NotFound(id))
    }

    pub fn trigger_status(&self, id: TaskId) -> ScheduleReport {
        self.scheduler.trigger_status(id)
    }

    pub async fn on_notification_fired(&self, id: TaskId) -> bool {
        self.scheduler.on_notification_fired(id).await
    }

    pub async fn on_geofence_entered(&self, id: TaskId) -> EngineResult<ArrivalOutcome> {
        self.scheduler.on_geofence_entered(id).await
    }

    pub async fn reconcile_on_startup(&self, now_ms: i64) -> EngineResult<ReconcileSummary> {
        self.scheduler.reconcile_on_startup(now_ms).await
    }

    /// Reconciles at the current clock instant.
    pub async fn reconcile_now(&self) -> EngineResult<ReconcileSummary> {
        let now_ms = self.scheduler.now_ms();
        self.scheduler.reconcile_on_startup(now_ms).await
    }

    pub async fn clear_all(&self) -> usize {
        self.scheduler.clear_all().await
    }
}
