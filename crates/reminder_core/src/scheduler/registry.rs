//! Registered-trigger bookkeeping.
//!
//! One `Registration` per task id records what the sinks currently hold for
//! that task. It is a process-local cache that reconciliation can always
//! rebuild from the task store.

use crate::compiler::PastDueRejected;
use crate::model::task::TaskId;
use crate::model::trigger::{LocationTrigger, TriggerState};
use crate::sink::{GeofenceHandle, NotificationHandle, NotificationPayload};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum TimeSlot {
    #[default]
    Empty,
    Armed {
        fires_at_ms: i64,
        payload: NotificationPayload,
        handle: NotificationHandle,
    },
    /// One-shot trigger already delivered; never re-armed for the same instant.
    Fired { fires_at_ms: i64 },
    Denied { fires_at_ms: i64, reason: String },
}

impl TimeSlot {
    pub(crate) fn state(&self) -> TriggerState {
        match self {
            Self::Empty => TriggerState::Unscheduled,
            Self::Armed { .. } => TriggerState::Armed,
            Self::Fired { .. } => TriggerState::Fired,
            Self::Denied { reason, .. } => TriggerState::Denied {
                reason: reason.clone(),
            },
        }
    }

    pub(crate) fn handle(&self) -> Option<&NotificationHandle> {
        match self {
            Self::Armed { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum LocationSlot {
    #[default]
    Empty,
    Armed {
        trigger: LocationTrigger,
        handle: GeofenceHandle,
    },
    Denied {
        trigger: LocationTrigger,
        reason: String,
    },
}

impl LocationSlot {
    pub(crate) fn state(&self) -> TriggerState {
        match self {
            Self::Empty => TriggerState::Unscheduled,
            Self::Armed { .. } => TriggerState::Armed,
            Self::Denied { reason, .. } => TriggerState::Denied {
                reason: reason.clone(),
            },
        }
    }

    pub(crate) fn handle(&self) -> Option<&GeofenceHandle> {
        match self {
            Self::Armed { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

/// Sink registration whose cancel failed; retried until the sink accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingCancel {
    Notification {
        task_id: TaskId,
        handle: NotificationHandle,
    },
    Region {
        task_id: TaskId,
        handle: GeofenceHandle,
    },
}

impl PendingCancel {
    pub(crate) fn task_id(&self) -> TaskId {
        match self {
            Self::Notification { task_id, .. } | Self::Region { task_id, .. } => *task_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Registration {
    pub(crate) time: TimeSlot,
    pub(crate) location: LocationSlot,
}

impl Registration {
    /// Nothing left worth remembering for this task.
    pub(crate) fn is_vacant(&self) -> bool {
        self.time == TimeSlot::Empty && self.location == LocationSlot::Empty
    }
}

/// Trigger state of one task after a scheduler operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub task_id: TaskId,
    pub time: TriggerState,
    pub location: TriggerState,
    /// Set when the task is stored but its due instant already passed.
    pub past_due: Option<PastDueRejected>,
}

impl ScheduleReport {
    pub(crate) fn from_registration(task_id: TaskId, registration: &Registration) -> Self {
        Self {
            task_id,
            time: registration.time.state(),
            location: registration.location.state(),
            past_due: None,
        }
    }

    /// Whether any sink refused a trigger for this task.
    pub fn has_denied(&self) -> bool {
        matches!(self.time, TriggerState::Denied { .. })
            || matches!(self.location, TriggerState::Denied { .. })
    }

    /// Number of triggers currently armed for this task (0..=2).
    pub fn armed_count(&self) -> usize {
        usize::from(self.time.is_armed()) + usize::from(self.location.is_armed())
    }
}

/// Outcome of a full reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub tasks_seen: usize,
    pub armed_time: usize,
    pub armed_location: usize,
    /// Platform-side registrations taken over without re-registering.
    pub adopted: usize,
    /// Platform-side or cached registrations cancelled as stale or orphaned.
    pub cancelled: usize,
    pub denied: usize,
    pub past_due: usize,
}

impl ReconcileSummary {
    pub(crate) fn absorb(&mut self, report: &ScheduleReport) {
        self.tasks_seen += 1;
        if report.time.is_armed() {
            self.armed_time += 1;
        }
        if report.location.is_armed() {
            self.armed_location += 1;
        }
        if report.has_denied() {
            self.denied += 1;
        }
        if report.past_due.is_some() {
            self.past_due += 1;
        }
    }
}

/// Result of a geofence arrival event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrivalOutcome {
    Notified,
    /// Suppressed by `min_reentry_interval_ms`.
    Throttled { retry_after_ms: i64 },
    /// Task unknown, completed, or without a location.
    Ignored,
    Denied { reason: String },
}
