//! Trigger scheduler: the state machine between the task store and sinks.
//!
//! # Responsibility
//! - Keep the registered-trigger set consistent with the task store.
//! - Diff compiled triggers against what the sinks hold and issue the
//!   minimal register/cancel calls.
//! - Rebuild everything from the store on startup and reactivation.
//!
//! # Invariants
//! - Mutations of one task id are serialized and never reordered; different
//!   task ids proceed concurrently.
//! - `reconcile_on_startup` and `clear_all` exclude every per-task operation.
//! - Triggers are always recomputed from the stored task, never from a
//!   caller snapshot, so a delete racing an in-flight create ends cancelled.
//! - An old time trigger is cancelled before its replacement is registered;
//!   a sink never holds two live time triggers for one task.
//! - Sink failures never abort an operation; they land in the report.
//! - A handle whose cancel failed is kept and retried on the next mutation
//!   of its task, on reconcile and on `clear_all`; it is never forgotten.

mod registry;

pub use registry::{ArrivalOutcome, ReconcileSummary, ScheduleReport};

use crate::clock::Clock;
use crate::compiler::TriggerCompiler;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::model::task::{Task, TaskId};
use crate::model::trigger::{LocationTrigger, TimeTrigger, TriggerState};
use crate::repo::task_store::TaskStore;
use crate::sink::{
    GeofenceHandle, GeofenceSink, MonitoredRegion, NotificationHandle, NotificationPayload,
    NotificationSink, ScheduledNotification,
};
use log::{debug, info, warn};
use registry::{LocationSlot, PendingCancel, Registration, TimeSlot};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock, RwLockReadGuard};

type TaskLocks = Mutex<HashMap<TaskId, Arc<AsyncMutex<()>>>>;

/// Serialization guard for one task id.
///
/// Dropping it releases the task lock and forgets the lock entry once no
/// other caller is queued on it.
pub(crate) struct TaskGuard<'a> {
    task_id: TaskId,
    locks: &'a TaskLocks,
    task: Option<OwnedMutexGuard<()>>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        let mut locks = lock(self.locks);
        drop(self.task.take());
        if locks
            .get(&self.task_id)
            .is_some_and(|task_lock| Arc::strong_count(task_lock) == 1)
        {
            locks.remove(&self.task_id);
        }
    }
}

/// Owner of the registered-trigger set.
pub struct Scheduler<S: TaskStore> {
    store: Arc<S>,
    notifications: Arc<dyn NotificationSink>,
    geofences: Arc<dyn GeofenceSink>,
    compiler: TriggerCompiler,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    gate: RwLock<()>,
    task_locks: TaskLocks,
    registry: Mutex<HashMap<TaskId, Registration>>,
    pending_cancels: Mutex<Vec<PendingCancel>>,
    last_arrival_ms: Mutex<HashMap<TaskId, i64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: TaskStore> Scheduler<S> {
    pub fn new(
        store: Arc<S>,
        notifications: Arc<dyn NotificationSink>,
        geofences: Arc<dyn GeofenceSink>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifications,
            geofences,
            compiler: TriggerCompiler::from_config(&config),
            config,
            clock,
            gate: RwLock::new(()),
            task_locks: Mutex::new(HashMap::new()),
            registry: Mutex::new(HashMap::new()),
            pending_cancels: Mutex::new(Vec::new()),
            last_arrival_ms: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Recomputes and applies triggers for `task_id` from the stored task.
    ///
    /// A task missing from the store is treated as deleted. Calling this
    /// again with nothing changed issues no sink calls.
    pub async fn on_task_created_or_updated(&self, task_id: TaskId) -> EngineResult<ScheduleReport> {
        let _guard = self.lock_task(task_id).await;
        self.sync_locked(task_id).await
    }

    /// Cancels every trigger of `task_id`. Safe for never-armed ids.
    pub async fn on_task_deleted(&self, task_id: TaskId) -> ScheduleReport {
        let _guard = self.lock_task(task_id).await;
        self.cancel_locked(task_id).await
    }

    /// Marks the time trigger of `task_id` as delivered.
    ///
    /// Returns `false` when no time trigger was armed. `completed` is not
    /// touched.
    pub async fn on_notification_fired(&self, task_id: TaskId) -> bool {
        let _guard = self.lock_task(task_id).await;
        let mut registry = lock(&self.registry);
        let Some(registration) = registry.get_mut(&task_id) else {
            debug!("event=notification_fired module=scheduler status=skip task_id={task_id} reason=unknown_task");
            return false;
        };
        let TimeSlot::Armed { fires_at_ms, .. } = registration.time else {
            debug!("event=notification_fired module=scheduler status=skip task_id={task_id} reason=not_armed");
            return false;
        };
        registration.time = TimeSlot::Fired { fires_at_ms };
        info!("event=notification_fired module=scheduler status=ok task_id={task_id} fires_at_ms={fires_at_ms}");
        true
    }

    /// Presents an arrival notification for `task_id`.
    ///
    /// The location trigger stays armed. Re-entries within
    /// `min_reentry_interval_ms` are throttled.
    pub async fn on_geofence_entered(&self, task_id: TaskId) -> EngineResult<ArrivalOutcome> {
        let _guard = self.lock_task(task_id).await;
        let task = match self.store.get(task_id)? {
            Some(task) if task.is_live() && task.location.is_some() => task,
            _ => {
                debug!("event=geofence_entered module=scheduler status=skip task_id={task_id} reason=not_monitorable");
                return Ok(ArrivalOutcome::Ignored);
            }
        };

        let now_ms = self.clock.now_ms();
        if let Some(interval) = self.config.min_reentry_interval_ms {
            let interval = i64::try_from(interval).unwrap_or(i64::MAX);
            if let Some(last) = lock(&self.last_arrival_ms).get(&task_id).copied() {
                let next_allowed = last.saturating_add(interval);
                if now_ms < next_allowed {
                    info!("event=geofence_entered module=scheduler status=skip task_id={task_id} reason=throttled");
                    return Ok(ArrivalOutcome::Throttled {
                        retry_after_ms: next_allowed - now_ms,
                    });
                }
            }
        }

        let payload = NotificationPayload::arrival(task.id, &task.name, &self.config.notification);
        match self.notifications.present_now(&payload).await {
            Ok(()) => {
                lock(&self.last_arrival_ms).insert(task_id, now_ms);
                info!("event=geofence_entered module=scheduler status=ok task_id={task_id}");
                Ok(ArrivalOutcome::Notified)
            }
            Err(err) => {
                warn!("event=geofence_entered module=scheduler status=error task_id={task_id} error_code=present_failed error={err}");
                Ok(ArrivalOutcome::Denied {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Rebuilds the registered-trigger set from the store as of `now_ms`.
    ///
    /// When a sink can enumerate its registrations, matching ones are adopted
    /// and stale ones cancelled; otherwise the in-process set is the baseline
    /// (empty after process death, so everything is re-registered). Triggers
    /// previously denied are retried once.
    pub async fn reconcile_on_startup(&self, now_ms: i64) -> EngineResult<ReconcileSummary> {
        let _gate = self.gate.write().await;
        info!("event=reconcile module=scheduler status=start now_ms={now_ms}");

        let tasks = self.store.list()?;
        let by_id: HashMap<TaskId, &Task> = tasks.iter().map(|task| (task.id, task)).collect();
        let mut summary = ReconcileSummary::default();

        summary.cancelled += self.retry_pending_cancels(None).await;
        self.adopt_notifications(&by_id, now_ms, &mut summary).await;
        self.adopt_regions(&by_id, now_ms, &mut summary).await;

        let orphans: Vec<TaskId> = lock(&self.registry)
            .keys()
            .filter(|id| !by_id.contains_key(id))
            .copied()
            .collect();
        for task_id in orphans {
            let report = self.cancel_locked(task_id).await;
            summary.cancelled += usize::from(report.time == TriggerState::Cancelled)
                + usize::from(report.location == TriggerState::Cancelled);
        }

        for task in &tasks {
            let report = self.apply(task.id, Some(task), now_ms, true).await;
            summary.absorb(&report);
        }

        info!(
            "event=reconcile module=scheduler status=ok tasks={} armed_time={} armed_location={} adopted={} cancelled={} denied={} past_due={}",
            summary.tasks_seen,
            summary.armed_time,
            summary.armed_location,
            summary.adopted,
            summary.cancelled,
            summary.denied,
            summary.past_due
        );
        Ok(summary)
    }

    /// Cancels every registered trigger and forgets all bookkeeping.
    ///
    /// Returns the number of sink registrations cancelled.
    pub async fn clear_all(&self) -> usize {
        let _gate = self.gate.write().await;
        let drained: Vec<(TaskId, Registration)> = lock(&self.registry).drain().collect();
        lock(&self.last_arrival_ms).clear();

        let mut cancelled = self.retry_pending_cancels(None).await;
        for (task_id, registration) in drained {
            if let Some(handle) = registration.time.handle() {
                cancelled += usize::from(self.cancel_notification(task_id, handle).await);
            }
            if let Some(handle) = registration.location.handle() {
                cancelled += usize::from(self.stop_region(task_id, handle).await);
            }
        }
        info!("event=clear_all module=scheduler status=ok cancelled={cancelled}");
        cancelled
    }

    /// Current trigger state of one task.
    pub fn trigger_status(&self, task_id: TaskId) -> ScheduleReport {
        let registry = lock(&self.registry);
        match registry.get(&task_id) {
            Some(registration) => ScheduleReport::from_registration(task_id, registration),
            None => ScheduleReport::from_registration(task_id, &Registration::default()),
        }
    }

    /// Task ids with at least one armed trigger.
    pub fn armed_task_ids(&self) -> Vec<TaskId> {
        lock(&self.registry)
            .iter()
            .filter(|(_, registration)| {
                registration.time.handle().is_some() || registration.location.handle().is_some()
            })
            .map(|(task_id, _)| *task_id)
            .collect()
    }

    /// Location trigger currently armed for `task_id`, if any.
    pub fn monitored_region(&self, task_id: TaskId) -> Option<LocationTrigger> {
        match lock(&self.registry).get(&task_id)?.location {
            LocationSlot::Armed { trigger, .. } => Some(trigger),
            _ => None,
        }
    }

    /// Number of sink registrations waiting for a cancel retry.
    pub fn pending_cancel_count(&self) -> usize {
        lock(&self.pending_cancels).len()
    }

    pub(crate) async fn lock_task(&self, task_id: TaskId) -> TaskGuard<'_> {
        let gate = self.gate.read().await;
        let task_lock = lock(&self.task_locks).entry(task_id).or_default().clone();
        let task = task_lock.lock_owned().await;
        TaskGuard {
            task_id,
            locks: &self.task_locks,
            task: Some(task),
            _gate: gate,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_task_locks(&self) -> usize {
        lock(&self.task_locks).len()
    }

    /// Re-applies triggers from the stored task. Caller holds the task guard.
    pub(crate) async fn sync_locked(&self, task_id: TaskId) -> EngineResult<ScheduleReport> {
        let task = self.store.get(task_id)?;
        let now_ms = self.clock.now_ms();
        Ok(self.apply(task_id, task.as_ref(), now_ms, false).await)
    }

    /// Cancels all triggers of `task_id`. Caller holds the task guard.
    pub(crate) async fn cancel_locked(&self, task_id: TaskId) -> ScheduleReport {
        let report = self.apply(task_id, None, self.clock.now_ms(), false).await;
        lock(&self.last_arrival_ms).remove(&task_id);
        report
    }

    async fn apply(
        &self,
        task_id: TaskId,
        task: Option<&Task>,
        now_ms: i64,
        retry_denied: bool,
    ) -> ScheduleReport {
        self.retry_pending_cancels(Some(task_id)).await;
        let compiled = task
            .map(|task| self.compiler.compile(task, now_ms))
            .unwrap_or_default();
        debug!(
            "event=compile module=scheduler status=ok task_id={task_id} triggers={}",
            compiled.triggers().len()
        );
        let previous = lock(&self.registry)
            .get(&task_id)
            .cloned()
            .unwrap_or_default();

        let desired_time = compiled.time.zip(task).map(|(trigger, task)| {
            let payload = NotificationPayload::due(task.id, &task.name, &self.config.notification);
            (trigger, payload)
        });
        let (time, time_state) = self
            .apply_time(task_id, previous.time, desired_time, retry_denied)
            .await;
        let (location, location_state) = self
            .apply_location(task_id, previous.location, compiled.location, retry_denied)
            .await;

        let registration = Registration { time, location };
        {
            let mut registry = lock(&self.registry);
            if task.is_none() || registration.is_vacant() {
                registry.remove(&task_id);
            } else {
                registry.insert(task_id, registration);
            }
        }

        if let Some(past_due) = compiled.past_due {
            info!(
                "event=past_due_rejected module=scheduler status=skip task_id={task_id} due_at_ms={} now_ms={}",
                past_due.due_at_ms, past_due.now_ms
            );
        }

        ScheduleReport {
            task_id,
            time: time_state,
            location: location_state,
            past_due: compiled.past_due,
        }
    }

    async fn apply_time(
        &self,
        task_id: TaskId,
        previous: TimeSlot,
        desired: Option<(TimeTrigger, NotificationPayload)>,
        retry_denied: bool,
    ) -> (TimeSlot, TriggerState) {
        let Some((trigger, payload)) = desired else {
            return match previous {
                TimeSlot::Armed { handle, .. } => {
                    self.cancel_notification(task_id, &handle).await;
                    (TimeSlot::Empty, TriggerState::Cancelled)
                }
                fired @ TimeSlot::Fired { .. } => (fired, TriggerState::Fired),
                _ => (TimeSlot::Empty, TriggerState::Unscheduled),
            };
        };

        let unchanged = match &previous {
            TimeSlot::Armed {
                fires_at_ms,
                payload: armed_payload,
                ..
            } => *fires_at_ms == trigger.fires_at_ms && *armed_payload == payload,
            TimeSlot::Fired { fires_at_ms } => *fires_at_ms == trigger.fires_at_ms,
            TimeSlot::Denied { fires_at_ms, .. } => {
                *fires_at_ms == trigger.fires_at_ms && !retry_denied
            }
            TimeSlot::Empty => false,
        };
        if unchanged {
            let state = previous.state();
            return (previous, state);
        }

        if let TimeSlot::Armed { handle, .. } = &previous {
            self.cancel_notification(task_id, handle).await;
        }

        match self
            .notifications
            .schedule_at(task_id, trigger.fires_at_ms, &payload)
            .await
        {
            Ok(handle) => {
                info!(
                    "event=trigger_armed module=scheduler status=ok task_id={task_id} kind=time fires_at_ms={} handle={handle}",
                    trigger.fires_at_ms
                );
                (
                    TimeSlot::Armed {
                        fires_at_ms: trigger.fires_at_ms,
                        payload,
                        handle,
                    },
                    TriggerState::Armed,
                )
            }
            Err(err) => {
                warn!("event=trigger_armed module=scheduler status=error task_id={task_id} kind=time error_code=scheduling_denied error={err}");
                let reason = err.to_string();
                (
                    TimeSlot::Denied {
                        fires_at_ms: trigger.fires_at_ms,
                        reason: reason.clone(),
                    },
                    TriggerState::Denied { reason },
                )
            }
        }
    }

    async fn apply_location(
        &self,
        task_id: TaskId,
        previous: LocationSlot,
        desired: Option<LocationTrigger>,
        retry_denied: bool,
    ) -> (LocationSlot, TriggerState) {
        let Some(trigger) = desired else {
            return match previous {
                LocationSlot::Armed { handle, .. } => {
                    self.stop_region(task_id, &handle).await;
                    (LocationSlot::Empty, TriggerState::Cancelled)
                }
                _ => (LocationSlot::Empty, TriggerState::Unscheduled),
            };
        };

        let unchanged = match &previous {
            LocationSlot::Armed { trigger: armed, .. } => *armed == trigger,
            LocationSlot::Denied { trigger: denied, .. } => *denied == trigger && !retry_denied,
            LocationSlot::Empty => false,
        };
        if unchanged {
            let state = previous.state();
            return (previous, state);
        }

        if let LocationSlot::Armed { handle, .. } = &previous {
            self.stop_region(task_id, handle).await;
        }

        match self
            .geofences
            .start_monitoring(task_id, trigger.center, trigger.radius_m)
            .await
        {
            Ok(handle) => {
                info!(
                    "event=trigger_armed module=scheduler status=ok task_id={task_id} kind=location radius_m={} handle={handle}",
                    trigger.radius_m
                );
                (LocationSlot::Armed { trigger, handle }, TriggerState::Armed)
            }
            Err(err) => {
                warn!("event=trigger_armed module=scheduler status=error task_id={task_id} kind=location error_code=scheduling_denied error={err}");
                let reason = err.to_string();
                (
                    LocationSlot::Denied {
                        trigger,
                        reason: reason.clone(),
                    },
                    TriggerState::Denied { reason },
                )
            }
        }
    }

    /// Returns `false` when the sink refused; the handle is then kept for retry.
    async fn cancel_notification(&self, task_id: TaskId, handle: &NotificationHandle) -> bool {
        match self.notifications.cancel(handle).await {
            Ok(()) => {
                info!("event=trigger_cancelled module=scheduler status=ok task_id={task_id} kind=time handle={handle}");
                true
            }
            Err(err) => {
                warn!("event=trigger_cancelled module=scheduler status=error task_id={task_id} kind=time handle={handle} error={err} retry=pending");
                self.defer_cancel(PendingCancel::Notification {
                    task_id,
                    handle: handle.clone(),
                });
                false
            }
        }
    }

    async fn stop_region(&self, task_id: TaskId, handle: &GeofenceHandle) -> bool {
        match self.geofences.stop_monitoring(handle).await {
            Ok(()) => {
                info!("event=trigger_cancelled module=scheduler status=ok task_id={task_id} kind=location handle={handle}");
                true
            }
            Err(err) => {
                warn!("event=trigger_cancelled module=scheduler status=error task_id={task_id} kind=location handle={handle} error={err} retry=pending");
                self.defer_cancel(PendingCancel::Region {
                    task_id,
                    handle: handle.clone(),
                });
                false
            }
        }
    }

    fn defer_cancel(&self, entry: PendingCancel) {
        let mut pending = lock(&self.pending_cancels);
        if !pending.contains(&entry) {
            pending.push(entry);
        }
    }

    /// Retries refused cancels, all of them or only those of `scope`.
    ///
    /// Returns how many the sinks accepted this time.
    async fn retry_pending_cancels(&self, scope: Option<TaskId>) -> usize {
        let due: Vec<PendingCancel> = {
            let mut pending = lock(&self.pending_cancels);
            let (due, keep): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|entry| scope.map_or(true, |task_id| entry.task_id() == task_id));
            *pending = keep;
            due
        };

        let mut cancelled = 0;
        for entry in due {
            let accepted = match &entry {
                PendingCancel::Notification { task_id, handle } => {
                    self.cancel_notification(*task_id, handle).await
                }
                PendingCancel::Region { task_id, handle } => self.stop_region(*task_id, handle).await,
            };
            cancelled += usize::from(accepted);
        }
        cancelled
    }

    /// Aligns cached time slots with what the notification sink reports.
    async fn adopt_notifications(
        &self,
        tasks: &HashMap<TaskId, &Task>,
        now_ms: i64,
        summary: &mut ReconcileSummary,
    ) {
        let reported: Vec<ScheduledNotification> = match self.notifications.list_scheduled().await {
            Ok(Some(reported)) => reported,
            Ok(None) => return,
            Err(err) => {
                warn!("event=reconcile module=scheduler status=error error_code=list_scheduled_failed error={err}");
                return;
            }
        };

        let live: HashSet<&NotificationHandle> = reported.iter().map(|entry| &entry.handle).collect();
        let mut stale = Vec::new();
        {
            let mut registry = lock(&self.registry);
            for registration in registry.values_mut() {
                if registration
                    .time
                    .handle()
                    .is_some_and(|handle| !live.contains(handle))
                {
                    registration.time = TimeSlot::Empty;
                }
            }

            for entry in &reported {
                let slot = &mut registry.entry(entry.task_id).or_default().time;
                if slot.handle() == Some(&entry.handle) {
                    continue;
                }
                let adoptable = slot.handle().is_none()
                    && tasks.get(&entry.task_id).is_some_and(|task| {
                        self.compiler
                            .compile(task, now_ms)
                            .time
                            .is_some_and(|trigger| trigger.fires_at_ms == entry.fire_at_ms)
                            && entry.payload
                                == NotificationPayload::due(
                                    task.id,
                                    &task.name,
                                    &self.config.notification,
                                )
                    });
                if adoptable {
                    *slot = TimeSlot::Armed {
                        fires_at_ms: entry.fire_at_ms,
                        payload: entry.payload.clone(),
                        handle: entry.handle.clone(),
                    };
                    summary.adopted += 1;
                } else {
                    stale.push((entry.task_id, entry.handle.clone()));
                }
            }
            registry.retain(|_, registration| !registration.is_vacant());
        }

        for (task_id, handle) in stale {
            summary.cancelled += usize::from(self.cancel_notification(task_id, &handle).await);
        }
    }

    /// Aligns cached location slots with what the geofence sink reports.
    async fn adopt_regions(
        &self,
        tasks: &HashMap<TaskId, &Task>,
        now_ms: i64,
        summary: &mut ReconcileSummary,
    ) {
        let reported: Vec<MonitoredRegion> = match self.geofences.list_monitored().await {
            Ok(Some(reported)) => reported,
            Ok(None) => return,
            Err(err) => {
                warn!("event=reconcile module=scheduler status=error error_code=list_monitored_failed error={err}");
                return;
            }
        };

        let live: HashSet<&GeofenceHandle> = reported.iter().map(|region| &region.handle).collect();
        let mut stale = Vec::new();
        {
            let mut registry = lock(&self.registry);
            for registration in registry.values_mut() {
                if registration
                    .location
                    .handle()
                    .is_some_and(|handle| !live.contains(handle))
                {
                    registration.location = LocationSlot::Empty;
                }
            }

            for region in &reported {
                let slot = &mut registry.entry(region.task_id).or_default().location;
                if slot.handle() == Some(&region.handle) {
                    continue;
                }
                let desired = tasks
                    .get(&region.task_id)
                    .and_then(|task| self.compiler.compile(task, now_ms).location)
                    .filter(|trigger| {
                        trigger.center == region.center && trigger.radius_m == region.radius_m
                    });
                match desired {
                    Some(trigger) if slot.handle().is_none() => {
                        *slot = LocationSlot::Armed {
                            trigger,
                            handle: region.handle.clone(),
                        };
                        summary.adopted += 1;
                    }
                    _ => stale.push((region.task_id, region.handle.clone())),
                }
            }
            registry.retain(|_, registration| !registration.is_vacant());
        }

        for (task_id, handle) in stale {
            summary.cancelled += usize::from(self.stop_region(task_id, &handle).await);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Scheduler;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::db::open_db_in_memory;
    use crate::model::task::{GeoPoint, Task};
    use crate::model::trigger::TriggerState;
    use crate::repo::task_store::{SqliteTaskStore, TaskStore};
    use crate::sink::memory::{MemoryGeofenceSink, MemoryNotificationSink};
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        scheduler: Scheduler<SqliteTaskStore>,
        notifications: Arc<MemoryNotificationSink>,
        geofences: Arc<MemoryGeofenceSink>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteTaskStore::try_new(open_db_in_memory().unwrap()).unwrap());
        let notifications = Arc::new(MemoryNotificationSink::new());
        let geofences = Arc::new(MemoryGeofenceSink::new());
        let scheduler = Scheduler::new(
            store,
            notifications.clone(),
            geofences.clone(),
            EngineConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        );
        Fixture {
            scheduler,
            notifications,
            geofences,
        }
    }

    #[tokio::test]
    async fn missing_task_is_treated_as_deleted() {
        let fx = fixture();
        let task = Task::new("Water", NOW + 1_000, None).unwrap();

        let report = fx.scheduler.on_task_created_or_updated(task.id).await.unwrap();
        assert_eq!(report.time, TriggerState::Unscheduled);
        assert_eq!(fx.notifications.calls().register, 0);
    }

    #[tokio::test]
    async fn removing_location_cancels_only_the_geofence() {
        let fx = fixture();
        let mut task =
            Task::new("Gym", NOW + 1_000, Some(GeoPoint::new(37.0, -122.0))).unwrap();
        fx.scheduler.store().put(&task).unwrap();
        let armed = fx.scheduler.on_task_created_or_updated(task.id).await.unwrap();
        assert_eq!(armed.armed_count(), 2);

        task.location = None;
        fx.scheduler.store().put(&task).unwrap();
        let report = fx.scheduler.on_task_created_or_updated(task.id).await.unwrap();

        assert_eq!(report.time, TriggerState::Armed);
        assert_eq!(report.location, TriggerState::Cancelled);
        assert!(fx.geofences.regions().is_empty());
        assert_eq!(fx.notifications.pending().len(), 1);
        assert_eq!(fx.notifications.calls().cancel, 0);
    }

    #[tokio::test]
    async fn notification_fired_without_armed_trigger_is_a_no_op() {
        let fx = fixture();
        let task = Task::new("Water", NOW - 1, None).unwrap();
        fx.scheduler.store().put(&task).unwrap();
        fx.scheduler.on_task_created_or_updated(task.id).await.unwrap();

        assert!(!fx.scheduler.on_notification_fired(task.id).await);
        assert!(fx.scheduler.armed_task_ids().is_empty());
    }

    #[tokio::test]
    async fn clear_all_cancels_every_registration() {
        let fx = fixture();
        for name in ["a", "b"] {
            let task = Task::new(name, NOW + 10, Some(GeoPoint::new(1.0, 1.0))).unwrap();
            fx.scheduler.store().put(&task).unwrap();
            fx.scheduler.on_task_created_or_updated(task.id).await.unwrap();
        }

        assert_eq!(fx.scheduler.clear_all().await, 4);
        assert!(fx.notifications.pending().is_empty());
        assert!(fx.geofences.regions().is_empty());
        assert!(fx.scheduler.armed_task_ids().is_empty());
    }

    #[tokio::test]
    async fn lock_entries_do_not_outlive_their_operation() {
        let fx = fixture();
        let unknown = Task::new("Ghost", NOW + 1_000, None).unwrap();
        fx.scheduler.on_task_created_or_updated(unknown.id).await.unwrap();
        fx.scheduler.on_geofence_entered(unknown.id).await.unwrap();
        assert!(!fx.scheduler.on_notification_fired(unknown.id).await);
        assert_eq!(fx.scheduler.tracked_task_locks(), 0);

        let task = Task::new("Water", NOW + 1_000, None).unwrap();
        fx.scheduler.store().put(&task).unwrap();
        {
            let _guard = fx.scheduler.lock_task(task.id).await;
            assert_eq!(fx.scheduler.tracked_task_locks(), 1);
        }
        assert_eq!(fx.scheduler.tracked_task_locks(), 0);
    }

    #[tokio::test]
    async fn clear_all_retries_refused_region_stops() {
        let fx = fixture();
        let mut task = Task::new("Gym", NOW + 1_000, Some(GeoPoint::new(37.0, -122.0))).unwrap();
        fx.scheduler.store().put(&task).unwrap();
        fx.scheduler.on_task_created_or_updated(task.id).await.unwrap();

        fx.geofences.fail_cancels("location service restarting");
        task.location = None;
        fx.scheduler.store().put(&task).unwrap();
        let report = fx.scheduler.on_task_created_or_updated(task.id).await.unwrap();
        assert_eq!(report.location, TriggerState::Cancelled);
        assert_eq!(fx.geofences.regions().len(), 1);
        assert_eq!(fx.scheduler.pending_cancel_count(), 1);

        fx.geofences.accept_cancels();
        assert_eq!(fx.scheduler.clear_all().await, 2);
        assert!(fx.geofences.regions().is_empty());
        assert_eq!(fx.scheduler.pending_cancel_count(), 0);
    }
}
