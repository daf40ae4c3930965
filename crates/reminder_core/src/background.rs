//! Background reactivation hook.
//!
//! # Responsibility
//! - Handle OS re-invocations of the registered background task.
//! - Rebuild trigger state from the store, then deliver a geofence arrival
//!   when the invocation carries one.
//!
//! # Invariants
//! - Never fatal: every failure is logged and reported in the outcome.
//! - An invocation carrying an error does nothing beyond logging it.
//! - A wake-up position well outside the armed region is not an arrival.

use crate::model::task::{GeoPoint, TaskId};
use crate::repo::task_store::TaskStore;
use crate::scheduler::{ArrivalOutcome, ReconcileSummary};
use crate::service::reminder_service::ReminderService;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

/// Identifier the host registers the background task under.
pub const BACKGROUND_TASK_NAME: &str = "BACKGROUND-NOTIFICATION-TASK";

/// Allowance for the horizontal accuracy of a wake-up fix, in meters.
pub const POSITION_SLACK_M: f64 = 50.0;

/// Location payload delivered with a geofence wake-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GeoPoint>,
}

/// Arguments the OS passes to the background task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackgroundInvocation {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub geofence: Option<GeofenceEvent>,
}

/// What one invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundOutcome {
    pub reconciled: Option<ReconcileSummary>,
    pub arrival: Option<ArrivalOutcome>,
    /// Error codes of steps that failed.
    pub failures: Vec<&'static str>,
}

/// Runs one background invocation against `service`.
pub async fn handle_background_invocation<S: TaskStore>(
    service: &ReminderService<S>,
    invocation: &BackgroundInvocation,
) -> BackgroundOutcome {
    let mut outcome = BackgroundOutcome::default();

    if let Some(message) = &invocation.error {
        error!(
            "event=background_task module=background status=error task={BACKGROUND_TASK_NAME} error_len={}",
            message.len()
        );
        outcome.failures.push("platform_error");
        return outcome;
    }

    info!("event=background_task module=background status=start task={BACKGROUND_TASK_NAME}");
    match service.reconcile_now().await {
        Ok(summary) => outcome.reconciled = Some(summary),
        Err(err) => {
            warn!(
                "event=background_task module=background status=error step=reconcile error_code={} error={err}",
                err.code()
            );
            outcome.failures.push(err.code());
        }
    }

    if let Some(event) = invocation
        .geofence
        .as_ref()
        .filter(|event| !outside_monitored_region(service, event))
    {
        match service.on_geofence_entered(event.task_id).await {
            Ok(arrival) => outcome.arrival = Some(arrival),
            Err(err) => {
                warn!(
                    "event=background_task module=background status=error step=geofence task_id={} error_code={}",
                    event.task_id,
                    err.code()
                );
                outcome.failures.push(err.code());
            }
        }
    } else if let Some(event) = &invocation.geofence {
        info!(
            "event=background_task module=background status=skip step=geofence task_id={} reason=outside_region",
            event.task_id
        );
        outcome.arrival = Some(ArrivalOutcome::Ignored);
    }

    info!(
        "event=background_task module=background status=ok failures={}",
        outcome.failures.len()
    );
    outcome
}

/// Events without a position, or for tasks with no armed region, are left to
/// the scheduler.
fn outside_monitored_region<S: TaskStore>(
    service: &ReminderService<S>,
    event: &GeofenceEvent,
) -> bool {
    let (Some(position), Some(region)) = (
        event.position,
        service.scheduler().monitored_region(event.task_id),
    ) else {
        return false;
    };
    position.distance_m(&region.center) > region.radius_m + POSITION_SLACK_M
}
