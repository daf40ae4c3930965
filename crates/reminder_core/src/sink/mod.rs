//! Platform sink contracts.
//!
//! # Responsibility
//! - Define the notification and geofence facilities the scheduler arms
//!   triggers against.
//! - Provide host-side adapters (in-memory fakes, platform command outbox).
//!
//! # Invariants
//! - Sinks are best-effort but durable across app suspension.
//! - A refusal is reported as `SinkError::Denied`, never as a panic.
//! - Enumeration is optional; `Ok(None)` means the sink cannot enumerate.

use crate::config::NotificationConfig;
use crate::model::task::{GeoPoint, TaskId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory;
pub mod outbox;

pub type SinkResult<T> = Result<T, SinkError>;

/// Sink failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Scheduling refused, e.g. missing permission.
    Denied(String),
    /// Sink temporarily unavailable.
    Unavailable(String),
}

impl Display for SinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Denied(reason) => write!(f, "scheduling denied: {reason}"),
            Self::Unavailable(reason) => write!(f, "sink unavailable: {reason}"),
        }
    }
}

impl Error for SinkError {}

/// Opaque handle of a scheduled notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationHandle(pub String);

/// Opaque handle of a monitored region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeofenceHandle(pub String);

impl Display for NotificationHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for GeofenceHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a notification is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Due,
    Arrival,
}

/// Notification content plus presentation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub task_id: TaskId,
    pub kind: ReminderKind,
    pub title: String,
    pub body: String,
    pub show_alert: bool,
    pub play_sound: bool,
    pub set_badge: bool,
}

impl NotificationPayload {
    /// Payload for a time reminder.
    pub fn due(task_id: TaskId, task_name: &str, config: &NotificationConfig) -> Self {
        Self::build(
            task_id,
            ReminderKind::Due,
            format!("It's time for your task: {task_name}"),
            config,
        )
    }

    /// Payload for a geofence arrival.
    pub fn arrival(task_id: TaskId, task_name: &str, config: &NotificationConfig) -> Self {
        Self::build(
            task_id,
            ReminderKind::Arrival,
            format!("You are near the place for: {task_name}"),
            config,
        )
    }

    fn build(
        task_id: TaskId,
        kind: ReminderKind,
        body: String,
        config: &NotificationConfig,
    ) -> Self {
        Self {
            task_id,
            kind,
            title: config.title.clone(),
            body,
            show_alert: config.show_alert,
            play_sound: config.play_sound,
            set_badge: config.set_badge,
        }
    }
}

/// A notification the sink reports as pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub handle: NotificationHandle,
    pub task_id: TaskId,
    pub fire_at_ms: i64,
    pub payload: NotificationPayload,
}

/// A region the sink reports as monitored.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredRegion {
    pub handle: GeofenceHandle,
    pub task_id: TaskId,
    pub center: GeoPoint,
    pub radius_m: f64,
}

/// One-shot local notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Schedules a notification at `fire_at_ms`.
    async fn schedule_at(
        &self,
        task_id: TaskId,
        fire_at_ms: i64,
        payload: &NotificationPayload,
    ) -> SinkResult<NotificationHandle>;

    /// Presents a notification immediately.
    async fn present_now(&self, payload: &NotificationPayload) -> SinkResult<()>;

    /// Cancels a pending notification. Unknown handles are not an error.
    async fn cancel(&self, handle: &NotificationHandle) -> SinkResult<()>;

    /// Lists pending notifications when the platform supports it.
    async fn list_scheduled(&self) -> SinkResult<Option<Vec<ScheduledNotification>>> {
        Ok(None)
    }
}

/// Continuous region monitoring.
#[async_trait]
pub trait GeofenceSink: Send + Sync {
    /// Starts monitoring a circular region for `task_id`.
    async fn start_monitoring(
        &self,
        task_id: TaskId,
        center: GeoPoint,
        radius_m: f64,
    ) -> SinkResult<GeofenceHandle>;

    /// Stops monitoring. Unknown handles are not an error.
    async fn stop_monitoring(&self, handle: &GeofenceHandle) -> SinkResult<()>;

    /// Lists monitored regions when the platform supports it.
    async fn list_monitored(&self) -> SinkResult<Option<Vec<MonitoredRegion>>> {
        Ok(None)
    }
}
