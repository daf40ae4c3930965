//! Task-to-trigger compilation.
//!
//! # Responsibility
//! - Map one task to the triggers it implies at a given instant.
//!
//! # Invariants
//! - Pure: no I/O, no clock reads; same input always yields the same output.
//! - Completed tasks compile to nothing.
//! - A due instant at or before `now` never yields a time trigger; it is
//!   reported as `PastDueRejected` instead.

use crate::config::{EngineConfig, DEFAULT_GEOFENCE_RADIUS_M};
use crate::model::task::{Task, TaskId};
use crate::model::trigger::{DwellMode, LocationTrigger, TimeTrigger, Trigger};

/// Informational report: the task is stored but gets no time trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PastDueRejected {
    pub task_id: TaskId,
    pub due_at_ms: i64,
    pub now_ms: i64,
}

/// Triggers implied by one task.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledTriggers {
    pub time: Option<TimeTrigger>,
    pub location: Option<LocationTrigger>,
    pub past_due: Option<PastDueRejected>,
}

impl CompiledTriggers {
    /// Flattened trigger list, time trigger first.
    pub fn triggers(&self) -> Vec<Trigger> {
        self.time
            .map(Trigger::Time)
            .into_iter()
            .chain(self.location.map(Trigger::Location))
            .collect()
    }
}

/// Trigger compiler with its tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerCompiler {
    geofence_radius_m: f64,
}

impl Default for TriggerCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_GEOFENCE_RADIUS_M)
    }
}

impl TriggerCompiler {
    pub fn new(geofence_radius_m: f64) -> Self {
        Self { geofence_radius_m }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.geofence_radius_m)
    }

    /// Compiles `task` as of `now_ms`.
    pub fn compile(&self, task: &Task, now_ms: i64) -> CompiledTriggers {
        if task.completed {
            return CompiledTriggers::default();
        }

        let (time, past_due) = if task.due_at_ms > now_ms {
            (
                Some(TimeTrigger {
                    task_id: task.id,
                    fires_at_ms: task.due_at_ms,
                }),
                None,
            )
        } else {
            (
                None,
                Some(PastDueRejected {
                    task_id: task.id,
                    due_at_ms: task.due_at_ms,
                    now_ms,
                }),
            )
        };

        let location = task.location.map(|center| LocationTrigger {
            task_id: task.id,
            center,
            radius_m: self.geofence_radius_m,
            dwell: DwellMode::OnFirstEntry,
        });

        CompiledTriggers {
            time,
            location,
            past_due,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TriggerCompiler;
    use crate::model::task::{GeoPoint, Task};
    use crate::model::trigger::{DwellMode, Trigger};

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn future_task_gets_exactly_one_time_trigger_at_due() {
        let task = Task::new("Water", NOW + 60_000, None).unwrap();
        let compiled = TriggerCompiler::default().compile(&task, NOW);

        let time = compiled.time.expect("time trigger");
        assert_eq!(time.fires_at_ms, NOW + 60_000);
        assert_eq!(time.task_id, task.id);
        assert!(compiled.location.is_none());
        assert!(compiled.past_due.is_none());
        assert_eq!(compiled.triggers().len(), 1);
    }

    #[test]
    fn due_equal_to_now_is_past_due() {
        let task = Task::new("Water", NOW, None).unwrap();
        let compiled = TriggerCompiler::default().compile(&task, NOW);

        assert!(compiled.time.is_none());
        let report = compiled.past_due.expect("past due report");
        assert_eq!(report.due_at_ms, NOW);
        assert_eq!(report.now_ms, NOW);
    }

    #[test]
    fn completed_task_compiles_to_nothing() {
        let mut task = Task::new("Gym", NOW + 1, Some(GeoPoint::new(37.0, -122.0))).unwrap();
        task.completed = true;

        let compiled = TriggerCompiler::default().compile(&task, NOW);
        assert!(compiled.triggers().is_empty());
        assert!(compiled.past_due.is_none());
    }

    #[test]
    fn location_trigger_ignores_due_time_and_uses_configured_radius() {
        let task = Task::new("Gym", NOW - 1, Some(GeoPoint::new(37.0, -122.0))).unwrap();
        let compiled = TriggerCompiler::new(250.0).compile(&task, NOW);

        assert!(compiled.time.is_none());
        let location = compiled.location.expect("location trigger");
        assert_eq!(location.radius_m, 250.0);
        assert_eq!(location.center, GeoPoint::new(37.0, -122.0));
        assert_eq!(location.dwell, DwellMode::OnFirstEntry);
        assert!(matches!(compiled.triggers()[0], Trigger::Location(_)));
    }

    #[test]
    fn compile_is_repeatable() {
        let task = Task::new("Gym", NOW + 5, Some(GeoPoint::new(1.0, 2.0))).unwrap();
        let compiler = TriggerCompiler::default();
        assert_eq!(compiler.compile(&task, NOW), compiler.compile(&task, NOW));
    }
}
