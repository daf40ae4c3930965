//! In-process sinks that simulate the platform.
//!
//! Used by tests and the CLI demo. Both sinks can be told to deny or to
//! fail cancels, and count every call so callers can assert on duplicate
//! registrations.

use super::{
    GeofenceHandle, GeofenceSink, MonitoredRegion, NotificationHandle, NotificationPayload,
    NotificationSink, ScheduledNotification, SinkError, SinkResult,
};
use crate::model::task::{GeoPoint, TaskId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Call counters for one sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCalls {
    pub register: usize,
    pub cancel: usize,
    pub present: usize,
}

#[derive(Debug, Default)]
struct NotificationState {
    next_handle: u64,
    scheduled: BTreeMap<NotificationHandle, ScheduledNotification>,
    presented: Vec<NotificationPayload>,
    denied: Option<String>,
    cancel_failure: Option<String>,
    calls: SinkCalls,
}

/// Notification sink kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    enumerable: bool,
    state: Mutex<NotificationState>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that answers `list_scheduled` with its pending set.
    pub fn enumerable() -> Self {
        Self {
            enumerable: true,
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, NotificationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every later `schedule_at`/`present_now` fail with `Denied`.
    pub fn deny(&self, reason: impl Into<String>) {
        self.state().denied = Some(reason.into());
    }

    pub fn allow(&self) {
        self.state().denied = None;
    }

    /// Makes every later `cancel` fail with `Unavailable`, keeping the entry.
    pub fn fail_cancels(&self, reason: impl Into<String>) {
        self.state().cancel_failure = Some(reason.into());
    }

    pub fn accept_cancels(&self) {
        self.state().cancel_failure = None;
    }

    /// Pending notifications ordered by handle.
    pub fn pending(&self) -> Vec<ScheduledNotification> {
        self.state().scheduled.values().cloned().collect()
    }

    pub fn pending_for(&self, task_id: TaskId) -> Vec<ScheduledNotification> {
        self.pending()
            .into_iter()
            .filter(|entry| entry.task_id == task_id)
            .collect()
    }

    pub fn presented(&self) -> Vec<NotificationPayload> {
        self.state().presented.clone()
    }

    pub fn calls(&self) -> SinkCalls {
        self.state().calls
    }

    /// Simulates the OS delivering everything due at `now_ms`.
    ///
    /// Delivered entries are removed and returned in fire order.
    pub fn fire_due(&self, now_ms: i64) -> Vec<ScheduledNotification> {
        let mut state = self.state();
        let due: Vec<NotificationHandle> = state
            .scheduled
            .values()
            .filter(|entry| entry.fire_at_ms <= now_ms)
            .map(|entry| entry.handle.clone())
            .collect();
        let mut fired: Vec<ScheduledNotification> = due
            .iter()
            .filter_map(|handle| state.scheduled.remove(handle))
            .collect();
        fired.sort_by_key(|entry| entry.fire_at_ms);
        state
            .presented
            .extend(fired.iter().map(|entry| entry.payload.clone()));
        fired
    }

    /// Drops all pending entries, as a reinstall would.
    pub fn wipe(&self) {
        self.state().scheduled.clear();
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn schedule_at(
        &self,
        task_id: TaskId,
        fire_at_ms: i64,
        payload: &NotificationPayload,
    ) -> SinkResult<NotificationHandle> {
        let mut state = self.state();
        state.calls.register += 1;
        if let Some(reason) = &state.denied {
            return Err(SinkError::Denied(reason.clone()));
        }
        state.next_handle += 1;
        let handle = NotificationHandle(format!("notification-{}", state.next_handle));
        state.scheduled.insert(
            handle.clone(),
            ScheduledNotification {
                handle: handle.clone(),
                task_id,
                fire_at_ms,
                payload: payload.clone(),
            },
        );
        Ok(handle)
    }

    async fn present_now(&self, payload: &NotificationPayload) -> SinkResult<()> {
        let mut state = self.state();
        state.calls.present += 1;
        if let Some(reason) = &state.denied {
            return Err(SinkError::Denied(reason.clone()));
        }
        state.presented.push(payload.clone());
        Ok(())
    }

    async fn cancel(&self, handle: &NotificationHandle) -> SinkResult<()> {
        let mut state = self.state();
        state.calls.cancel += 1;
        if let Some(reason) = &state.cancel_failure {
            return Err(SinkError::Unavailable(reason.clone()));
        }
        state.scheduled.remove(handle);
        Ok(())
    }

    async fn list_scheduled(&self) -> SinkResult<Option<Vec<ScheduledNotification>>> {
        if !self.enumerable {
            return Ok(None);
        }
        Ok(Some(self.pending()))
    }
}

#[derive(Debug, Default)]
struct GeofenceState {
    next_handle: u64,
    regions: BTreeMap<GeofenceHandle, MonitoredRegion>,
    denied: Option<String>,
    cancel_failure: Option<String>,
    calls: SinkCalls,
}

/// Geofence sink kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryGeofenceSink {
    enumerable: bool,
    state: Mutex<GeofenceState>,
}

impl MemoryGeofenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enumerable() -> Self {
        Self {
            enumerable: true,
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, GeofenceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn deny(&self, reason: impl Into<String>) {
        self.state().denied = Some(reason.into());
    }

    pub fn allow(&self) {
        self.state().denied = None;
    }

    pub fn fail_cancels(&self, reason: impl Into<String>) {
        self.state().cancel_failure = Some(reason.into());
    }

    pub fn accept_cancels(&self) {
        self.state().cancel_failure = None;
    }

    pub fn regions(&self) -> Vec<MonitoredRegion> {
        self.state().regions.values().cloned().collect()
    }

    pub fn regions_for(&self, task_id: TaskId) -> Vec<MonitoredRegion> {
        self.regions()
            .into_iter()
            .filter(|region| region.task_id == task_id)
            .collect()
    }

    pub fn calls(&self) -> SinkCalls {
        self.state().calls
    }

    /// Task ids whose monitored region contains `position`.
    pub fn regions_containing(&self, position: GeoPoint) -> Vec<TaskId> {
        self.state()
            .regions
            .values()
            .filter(|region| region.center.distance_m(&position) <= region.radius_m)
            .map(|region| region.task_id)
            .collect()
    }
}

#[async_trait]
impl GeofenceSink for MemoryGeofenceSink {
    async fn start_monitoring(
        &self,
        task_id: TaskId,
        center: GeoPoint,
        radius_m: f64,
    ) -> SinkResult<GeofenceHandle> {
        let mut state = self.state();
        state.calls.register += 1;
        if let Some(reason) = &state.denied {
            return Err(SinkError::Denied(reason.clone()));
        }
        state.next_handle += 1;
        let handle = GeofenceHandle(format!("geofence-{}", state.next_handle));
        state.regions.insert(
            handle.clone(),
            MonitoredRegion {
                handle: handle.clone(),
                task_id,
                center,
                radius_m,
            },
        );
        Ok(handle)
    }

    async fn stop_monitoring(&self, handle: &GeofenceHandle) -> SinkResult<()> {
        let mut state = self.state();
        state.calls.cancel += 1;
        if let Some(reason) = &state.cancel_failure {
            return Err(SinkError::Unavailable(reason.clone()));
        }
        state.regions.remove(handle);
        Ok(())
    }

    async fn list_monitored(&self) -> SinkResult<Option<Vec<MonitoredRegion>>> {
        if !self.enumerable {
            return Ok(None);
        }
        Ok(Some(self.regions()))
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryGeofenceSink, MemoryNotificationSink};
    use crate::config::NotificationConfig;
    use crate::model::task::GeoPoint;
    use crate::sink::{GeofenceSink, NotificationPayload, NotificationSink, SinkError};
    use uuid::Uuid;

    #[tokio::test]
    async fn fire_due_removes_only_due_entries() {
        let sink = MemoryNotificationSink::new();
        let task_id = Uuid::new_v4();
        let payload = NotificationPayload::due(task_id, "Water", &NotificationConfig::default());
        sink.schedule_at(task_id, 100, &payload).await.unwrap();
        sink.schedule_at(task_id, 200, &payload).await.unwrap();

        let fired = sink.fire_due(150);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].fire_at_ms, 100);
        assert_eq!(sink.pending().len(), 1);
        assert_eq!(sink.presented().len(), 1);
    }

    #[tokio::test]
    async fn denied_sink_counts_attempt_and_keeps_nothing() {
        let sink = MemoryGeofenceSink::new();
        sink.deny("location permission missing");

        let err = sink
            .start_monitoring(Uuid::new_v4(), GeoPoint::new(1.0, 1.0), 100.0)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SinkError::Denied("location permission missing".to_string())
        );
        assert_eq!(sink.calls().register, 1);
        assert!(sink.regions().is_empty());
    }

    #[tokio::test]
    async fn regions_containing_uses_radius() {
        let sink = MemoryGeofenceSink::new();
        let task_id = Uuid::new_v4();
        sink.start_monitoring(task_id, GeoPoint::new(37.0, -122.0), 100.0)
            .await
            .unwrap();

        assert_eq!(
            sink.regions_containing(GeoPoint::new(37.0005, -122.0)),
            vec![task_id]
        );
        assert!(sink
            .regions_containing(GeoPoint::new(37.01, -122.0))
            .is_empty());
    }

    #[tokio::test]
    async fn non_enumerable_sink_reports_none() {
        let sink = MemoryNotificationSink::new();
        assert!(sink.list_scheduled().await.unwrap().is_none());
        let sink = MemoryNotificationSink::enumerable();
        assert!(sink.list_scheduled().await.unwrap().is_some());
    }
}
