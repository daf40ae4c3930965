//! Platform command outbox.
//!
//! # Responsibility
//! - Adapt both sink contracts to a queue of platform commands that the host
//!   app drains and executes against OS notification/location APIs.
//! - Track host-reported permissions and refuse scheduling when denied.
//!
//! # Invariants
//! - Handles are deterministic per trigger, so re-registering the same
//!   trigger after process death replaces the OS entry instead of adding one.
//! - Enumeration answers only after the host restored the OS-side state.

use super::{
    GeofenceHandle, GeofenceSink, MonitoredRegion, NotificationHandle, NotificationPayload,
    NotificationSink, ScheduledNotification, SinkError, SinkResult,
};
use crate::model::task::{GeoPoint, TaskId};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Command for the host platform layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlatformCommand {
    ScheduleNotification {
        handle: NotificationHandle,
        fire_at_ms: i64,
        payload: NotificationPayload,
    },
    PresentNotification {
        payload: NotificationPayload,
    },
    CancelNotification {
        handle: NotificationHandle,
    },
    StartMonitoring {
        handle: GeofenceHandle,
        task_id: TaskId,
        center: GeoPoint,
        radius_m: f64,
    },
    StopMonitoring {
        handle: GeofenceHandle,
    },
}

/// Host-granted permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformPermissions {
    pub notifications: bool,
    pub location: bool,
}

impl Default for PlatformPermissions {
    fn default() -> Self {
        Self {
            notifications: true,
            location: true,
        }
    }
}

#[derive(Debug, Default)]
struct OutboxState {
    permissions: PlatformPermissions,
    queue: Vec<PlatformCommand>,
    notifications: BTreeMap<NotificationHandle, ScheduledNotification>,
    regions: BTreeMap<GeofenceHandle, MonitoredRegion>,
    restored: bool,
}

/// Sink adapter that queues platform commands for the host.
#[derive(Debug, Default)]
pub struct PlatformOutbox {
    state: Mutex<OutboxState>,
}

impl PlatformOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, OutboxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_permissions(&self, permissions: PlatformPermissions) {
        info!(
            "event=platform_permissions module=sink status=ok notifications={} location={}",
            permissions.notifications, permissions.location
        );
        self.state().permissions = permissions;
    }

    pub fn permissions(&self) -> PlatformPermissions {
        self.state().permissions
    }

    /// Takes every queued command in issue order.
    pub fn drain(&self) -> Vec<PlatformCommand> {
        std::mem::take(&mut self.state().queue)
    }

    pub fn queued_len(&self) -> usize {
        self.state().queue.len()
    }

    /// Seeds the mirror with what the OS reports after a cold start.
    ///
    /// After this call `list_scheduled`/`list_monitored` answer with the
    /// mirror instead of `None`.
    pub fn restore(&self, notifications: Vec<ScheduledNotification>, regions: Vec<MonitoredRegion>) {
        let mut state = self.state();
        state.notifications = notifications
            .into_iter()
            .map(|entry| (entry.handle.clone(), entry))
            .collect();
        state.regions = regions
            .into_iter()
            .map(|region| (region.handle.clone(), region))
            .collect();
        state.restored = true;
    }
}

/// Handle of the time trigger for `task_id` at `fire_at_ms`.
pub fn notification_handle(task_id: TaskId, fire_at_ms: i64) -> NotificationHandle {
    NotificationHandle(format!("{task_id}:time:{fire_at_ms}"))
}

/// Handle of the location trigger for `task_id`.
pub fn geofence_handle(task_id: TaskId) -> GeofenceHandle {
    GeofenceHandle(format!("{task_id}:geo"))
}

#[async_trait]
impl NotificationSink for PlatformOutbox {
    async fn schedule_at(
        &self,
        task_id: TaskId,
        fire_at_ms: i64,
        payload: &NotificationPayload,
    ) -> SinkResult<NotificationHandle> {
        let mut state = self.state();
        if !state.permissions.notifications {
            warn!("event=outbox_schedule module=sink status=error error_code=permission_denied task_id={task_id}");
            return Err(SinkError::Denied(
                "notification permission not granted".to_string(),
            ));
        }

        let handle = notification_handle(task_id, fire_at_ms);
        state.notifications.insert(
            handle.clone(),
            ScheduledNotification {
                handle: handle.clone(),
                task_id,
                fire_at_ms,
                payload: payload.clone(),
            },
        );
        state.queue.push(PlatformCommand::ScheduleNotification {
            handle: handle.clone(),
            fire_at_ms,
            payload: payload.clone(),
        });
        Ok(handle)
    }

    async fn present_now(&self, payload: &NotificationPayload) -> SinkResult<()> {
        let mut state = self.state();
        if !state.permissions.notifications {
            return Err(SinkError::Denied(
                "notification permission not granted".to_string(),
            ));
        }
        state.queue.push(PlatformCommand::PresentNotification {
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn cancel(&self, handle: &NotificationHandle) -> SinkResult<()> {
        let mut state = self.state();
        state.notifications.remove(handle);
        state.queue.push(PlatformCommand::CancelNotification {
            handle: handle.clone(),
        });
        Ok(())
    }

    async fn list_scheduled(&self) -> SinkResult<Option<Vec<ScheduledNotification>>> {
        let state = self.state();
        if !state.restored {
            return Ok(None);
        }
        Ok(Some(state.notifications.values().cloned().collect()))
    }
}

#[async_trait]
impl GeofenceSink for PlatformOutbox {
    async fn start_monitoring(
        &self,
        task_id: TaskId,
        center: GeoPoint,
        radius_m: f64,
    ) -> SinkResult<GeofenceHandle> {
        let mut state = self.state();
        if !state.permissions.location {
            warn!("event=outbox_monitor module=sink status=error error_code=permission_denied task_id={task_id}");
            return Err(SinkError::Denied(
                "location permission not granted".to_string(),
            ));
        }

        let handle = geofence_handle(task_id);
        state.regions.insert(
            handle.clone(),
            MonitoredRegion {
                handle: handle.clone(),
                task_id,
                center,
                radius_m,
            },
        );
        state.queue.push(PlatformCommand::StartMonitoring {
            handle: handle.clone(),
            task_id,
            center,
            radius_m,
        });
        Ok(handle)
    }

    async fn stop_monitoring(&self, handle: &GeofenceHandle) -> SinkResult<()> {
        let mut state = self.state();
        state.regions.remove(handle);
        state.queue.push(PlatformCommand::StopMonitoring {
            handle: handle.clone(),
        });
        Ok(())
    }

    async fn list_monitored(&self) -> SinkResult<Option<Vec<MonitoredRegion>>> {
        let state = self.state();
        if !state.restored {
            return Ok(None);
        }
        Ok(Some(state.regions.values().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::{notification_handle, PlatformCommand, PlatformOutbox, PlatformPermissions};
    use crate::config::NotificationConfig;
    use crate::sink::{NotificationPayload, NotificationSink, SinkError};
    use uuid::Uuid;

    #[tokio::test]
    async fn schedule_queues_command_with_deterministic_handle() {
        let outbox = PlatformOutbox::new();
        let task_id = Uuid::new_v4();
        let payload = NotificationPayload::due(task_id, "Water", &NotificationConfig::default());

        let first = outbox.schedule_at(task_id, 5_000, &payload).await.unwrap();
        let second = outbox.schedule_at(task_id, 5_000, &payload).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, notification_handle(task_id, 5_000));

        let commands = outbox.drain();
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[0],
            PlatformCommand::ScheduleNotification { fire_at_ms: 5_000, .. }
        ));
        assert_eq!(outbox.queued_len(), 0);
    }

    #[tokio::test]
    async fn denied_notifications_queue_nothing() {
        let outbox = PlatformOutbox::new();
        outbox.set_permissions(PlatformPermissions {
            notifications: false,
            location: true,
        });
        let task_id = Uuid::new_v4();
        let payload = NotificationPayload::due(task_id, "Water", &NotificationConfig::default());

        let err = outbox.schedule_at(task_id, 1, &payload).await.unwrap_err();
        assert!(matches!(err, SinkError::Denied(_)));
        assert!(outbox.drain().is_empty());
    }

    #[tokio::test]
    async fn enumeration_requires_restore() {
        let outbox = PlatformOutbox::new();
        assert!(outbox.list_scheduled().await.unwrap().is_none());

        outbox.restore(Vec::new(), Vec::new());
        assert_eq!(outbox.list_scheduled().await.unwrap(), Some(Vec::new()));
    }

    #[test]
    fn commands_serialize_with_op_tag() {
        let command = PlatformCommand::CancelNotification {
            handle: notification_handle(Uuid::nil(), 7),
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["op"], "cancel_notification");
    }
}
