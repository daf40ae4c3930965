//! Task domain model.
//!
//! # Responsibility
//! - Define the canonical reminder task record persisted by the task store.
//! - Validate task invariants before a task can enter the store.
//!
//! # Invariants
//! - `id` is stable and never reused for another task.
//! - `name` is never empty or whitespace-only at rest.
//! - `location`, when set, holds finite WGS84 coordinates.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for one reminder task.
pub type TaskId = Uuid;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Returns whether both coordinates are finite and in WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Validation failures for task records.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskValidationError {
    NilId,
    EmptyName,
    InvalidLocation { lat: f64, lng: f64 },
    /// Only raised when the engine is configured to reject past-due creation.
    PastDue { due_at_ms: i64, now_ms: i64 },
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "task id must not be nil"),
            Self::EmptyName => write!(f, "task name must not be empty"),
            Self::InvalidLocation { lat, lng } => {
                write!(f, "task location ({lat}, {lng}) is out of range")
            }
            Self::PastDue { due_at_ms, now_ms } => write!(
                f,
                "task dueAt ({due_at_ms}) must be later than now ({now_ms})"
            ),
        }
    }
}

impl Error for TaskValidationError {}

/// Canonical reminder task.
///
/// Serialized with the persisted field names (`dueAt` in epoch milliseconds).
/// Deserialization runs [`Task::validate`], so invalid records never load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(rename = "dueAt")]
    pub due_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Deserialize)]
struct TaskRecord {
    id: TaskId,
    name: String,
    #[serde(rename = "dueAt")]
    due_at_ms: i64,
    #[serde(default)]
    location: Option<GeoPoint>,
    #[serde(default)]
    completed: bool,
}

impl TryFrom<TaskRecord> for Task {
    type Error = TaskValidationError;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let task = Task {
            id: record.id,
            name: record.name,
            due_at_ms: record.due_at_ms,
            location: record.location,
            completed: record.completed,
        };
        task.validate()?;
        Ok(task)
    }
}

/// Partial update applied by `updateTask`.
///
/// `None` leaves a field untouched. `location: Some(None)` clears the location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub due_at_ms: Option<i64>,
    pub location: Option<Option<GeoPoint>>,
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn reschedule(due_at_ms: i64) -> Self {
        Self {
            due_at_ms: Some(due_at_ms),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.due_at_ms.is_none()
            && self.location.is_none()
            && self.completed.is_none()
    }
}

impl Task {
    /// Creates a validated task with a generated stable ID.
    ///
    /// The name is trimmed before storage.
    pub fn new(
        name: impl Into<String>,
        due_at_ms: i64,
        location: Option<GeoPoint>,
    ) -> Result<Self, TaskValidationError> {
        Self::with_id(Uuid::new_v4(), name, due_at_ms, location)
    }

    /// Creates a validated task with a caller-provided stable ID.
    pub fn with_id(
        id: TaskId,
        name: impl Into<String>,
        due_at_ms: i64,
        location: Option<GeoPoint>,
    ) -> Result<Self, TaskValidationError> {
        let task = Self {
            id,
            name: name.into().trim().to_string(),
            due_at_ms,
            location,
            completed: false,
        };
        task.validate()?;
        Ok(task)
    }

    /// Checks the at-rest invariants.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.id.is_nil() {
            return Err(TaskValidationError::NilId);
        }
        if self.name.trim().is_empty() {
            return Err(TaskValidationError::EmptyName);
        }
        if let Some(point) = self.location {
            if !point.is_valid() {
                return Err(TaskValidationError::InvalidLocation {
                    lat: point.lat,
                    lng: point.lng,
                });
            }
        }
        Ok(())
    }

    /// Returns a patched copy, validated. `self` is left untouched.
    pub fn patched(&self, patch: &TaskPatch) -> Result<Task, TaskValidationError> {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(due_at_ms) = patch.due_at_ms {
            next.due_at_ms = due_at_ms;
        }
        if let Some(location) = patch.location {
            next.location = location;
        }
        if let Some(completed) = patch.completed {
            next.completed = completed;
        }
        next.validate()?;
        Ok(next)
    }

    /// Returns a copy with `completed` flipped.
    pub fn toggled(&self) -> Task {
        let mut next = self.clone();
        next.completed = !next.completed;
        next
    }

    /// Live tasks are the only ones that may hold triggers.
    pub fn is_live(&self) -> bool {
        !self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::{GeoPoint, Task, TaskPatch, TaskValidationError};

    #[test]
    fn new_trims_name_and_defaults_to_incomplete() {
        let task = Task::new("  Water  ", 1_000, None).expect("valid task");
        assert_eq!(task.name, "Water");
        assert!(!task.completed);
        assert!(task.is_live());
    }

    #[test]
    fn whitespace_only_name_is_rejected() {
        let err = Task::new(" \t ", 1_000, None).expect_err("blank name must fail");
        assert_eq!(err, TaskValidationError::EmptyName);
    }

    #[test]
    fn out_of_range_location_is_rejected() {
        let err = Task::new("Gym", 1_000, Some(GeoPoint::new(91.0, 0.0)))
            .expect_err("latitude above 90 must fail");
        assert!(matches!(err, TaskValidationError::InvalidLocation { .. }));
    }

    #[test]
    fn patch_can_clear_location_without_touching_other_fields() {
        let task = Task::new("Gym", 1_000, Some(GeoPoint::new(37.0, -122.0))).unwrap();
        let patch = TaskPatch {
            location: Some(None),
            ..TaskPatch::default()
        };

        let next = task.patched(&patch).unwrap();
        assert_eq!(next.location, None);
        assert_eq!(next.name, task.name);
        assert_eq!(next.due_at_ms, task.due_at_ms);
    }

    #[test]
    fn patch_rejects_blank_rename() {
        let task = Task::new("Gym", 1_000, None).unwrap();
        let err = task.patched(&TaskPatch::rename("   ")).unwrap_err();
        assert_eq!(err, TaskValidationError::EmptyName);
    }

    #[test]
    fn haversine_distance_is_close_for_known_points() {
        let a = GeoPoint::new(37.0, -122.0);
        let b = GeoPoint::new(37.0009, -122.0);
        let meters = a.distance_m(&b);
        assert!((meters - 100.0).abs() < 1.0, "distance was {meters}");
    }
}
