//! Trigger model derived from tasks.
//!
//! # Invariants
//! - At most one `TimeTrigger` and one `LocationTrigger` exist per live task.
//! - A `TimeTrigger` fires at most once; a `LocationTrigger` stays armed until
//!   it is cancelled.

use crate::model::task::{GeoPoint, TaskId};

/// One-shot trigger at an absolute instant (epoch milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeTrigger {
    pub task_id: TaskId,
    pub fires_at_ms: i64,
}

/// How a geofence treats arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellMode {
    /// Fire when the device first enters the region.
    OnFirstEntry,
}

/// Continuous geofence trigger around a task location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationTrigger {
    pub task_id: TaskId,
    pub center: GeoPoint,
    pub radius_m: f64,
    pub dwell: DwellMode,
}

/// Schedulable condition derived from a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Time(TimeTrigger),
    Location(LocationTrigger),
}

/// Per-slot trigger state as seen by the scheduler.
///
/// `Denied` is the `Unscheduled` state with a recorded sink refusal, kept
/// separate so callers can warn the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerState {
    Unscheduled,
    Denied { reason: String },
    Armed,
    Fired,
    Cancelled,
}

impl TriggerState {
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unscheduled => "unscheduled",
            Self::Denied { .. } => "denied",
            Self::Armed => "armed",
            Self::Fired => "fired",
            Self::Cancelled => "cancelled",
        }
    }
}
