//! Core task reminder scheduling engine.
//! This crate is the single source of truth for task and trigger invariants.

pub mod background;
pub mod clock;
pub mod compiler;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod sink;

pub use background::{
    handle_background_invocation, BackgroundInvocation, BackgroundOutcome, GeofenceEvent,
    BACKGROUND_TASK_NAME,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compiler::{CompiledTriggers, PastDueRejected, TriggerCompiler};
pub use config::{ConfigError, EngineConfig, NotificationConfig};
pub use error::{EngineError, EngineResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::task::{GeoPoint, Task, TaskId, TaskPatch, TaskValidationError};
pub use model::trigger::{DwellMode, LocationTrigger, TimeTrigger, Trigger, TriggerState};
pub use repo::task_store::{
    decode_tasks, encode_tasks, SqliteTaskStore, StorageError, StorageResult, TaskStore,
    TASKS_STORAGE_KEY,
};
pub use scheduler::{ArrivalOutcome, ReconcileSummary, ScheduleReport, Scheduler};
pub use service::reminder_service::{ReminderService, TaskReceipt};
pub use sink::{
    GeofenceHandle, GeofenceSink, MonitoredRegion, NotificationHandle, NotificationPayload,
    NotificationSink, ReminderKind, ScheduledNotification, SinkError, SinkResult,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
