//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose the task operations and platform callbacks to Dart via FRB.
//! - Bridge engine sinks to the host through the platform command outbox.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Failures come back inside response envelopes with a stable
//!   `error_code`, never as thrown errors.
//! - The engine is configured lazily with the default database path when a
//!   task call arrives before `configure_engine`.

use log::warn;
use reminder_core::runtime::{self, RuntimeOptions, SharedService};
use reminder_core::sink::outbox::{PlatformCommand, PlatformOutbox, PlatformPermissions};
use reminder_core::{
    core_version as core_version_inner, handle_background_invocation,
    init_logging as init_logging_inner, ping as ping_inner, ArrivalOutcome,
    BackgroundInvocation, EngineConfig, EngineError, GeoPoint, GeofenceEvent, MonitoredRegion,
    ScheduleReport, ScheduledNotification, Task, TaskId, TaskPatch, TaskReceipt,
};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

const DB_FILE_NAME: &str = "daily_reminder.sqlite3";
const DB_PATH_ENV: &str = "DAILY_REMINDER_DB_PATH";

static OUTBOX: OnceLock<Arc<PlatformOutbox>> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Task projection returned to Dart.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskItem {
    pub id: String,
    pub name: String,
    /// Due instant in epoch milliseconds.
    pub due_at_ms: i64,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub completed: bool,
    /// `unscheduled|denied|armed|fired|cancelled`.
    pub time_trigger: String,
    /// `unscheduled|denied|armed|cancelled`.
    pub location_trigger: String,
}

/// Response envelope for single-task operations.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResponse {
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: String,
    pub task: Option<TaskItem>,
    /// Stored without a time trigger because `dueAt` already passed.
    pub past_due: bool,
    /// A sink refused a trigger; the UI should warn about permissions.
    pub scheduling_denied: bool,
}

impl TaskResponse {
    fn from_receipt(message: &str, receipt: &TaskReceipt) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: message.to_string(),
            task: Some(to_task_item(&receipt.task, &receipt.report)),
            past_due: receipt.report.past_due.is_some(),
            scheduling_denied: receipt.report.has_denied(),
        }
    }

    fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(code.to_string()),
            message: message.into(),
            task: None,
            past_due: false,
            scheduling_denied: false,
        }
    }
}

/// Response envelope for task listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskListResponse {
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: String,
    pub items: Vec<TaskItem>,
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResponse {
    pub ok: bool,
    pub error_code: Option<String>,
    pub message: String,
}

impl EngineResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            error_code: None,
            message: message.into(),
        }
    }

    fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error_code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

/// Configures the engine for this process and reconciles triggers.
///
/// Input semantics:
/// - `db_path`: database file; falls back to `DAILY_REMINDER_DB_PATH`, then
///   a file in the temp directory.
/// - `config_json`: optional engine config document.
///
/// # FFI contract
/// - Idempotent for the same database path.
/// - A different path while configured returns `already_configured`.
pub async fn configure_engine(
    db_path: Option<String>,
    config_json: Option<String>,
) -> EngineResponse {
    let config = match config_json.as_deref().map(EngineConfig::from_json_str) {
        Some(Ok(config)) => config,
        Some(Err(err)) => return EngineResponse::failure("config_error", err.to_string()),
        None => EngineConfig::default(),
    };
    let path = db_path
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_db_path);

    let service = match configure(path, config) {
        Ok(service) => service,
        Err(err) => return EngineResponse::failure(err.code(), err.to_string()),
    };
    match service.reconcile_now().await {
        Ok(summary) => EngineResponse::success(format!(
            "Engine ready: {} task(s), {} time and {} location trigger(s) armed.",
            summary.tasks_seen, summary.armed_time, summary.armed_location
        )),
        Err(err) => EngineResponse::failure(err.code(), err.to_string()),
    }
}

/// Drops in-process engine state. Platform registrations stay in place.
#[flutter_rust_bridge::frb(sync)]
pub fn shutdown_engine() -> bool {
    runtime::shutdown()
}

/// Creates a task and arms its triggers.
///
/// `lat`/`lng` must be given together to attach a location.
pub async fn add_task(
    name: String,
    due_at_ms: i64,
    lat: Option<f64>,
    lng: Option<f64>,
) -> TaskResponse {
    let location = match to_location(lat, lng) {
        Ok(location) => location,
        Err(message) => return TaskResponse::failure("validation_error", message),
    };
    let service = match engine() {
        Ok(service) => service,
        Err(err) => return TaskResponse::failure(err.code(), err.to_string()),
    };
    match service.add_task(&name, due_at_ms, location).await {
        Ok(receipt) => TaskResponse::from_receipt("Task created.", &receipt),
        Err(err) => TaskResponse::failure(err.code(), format!("add_task failed: {err}")),
    }
}

/// Partially updates a task.
///
/// `None` leaves a field untouched; `clear_location` removes the location
/// and wins over `lat`/`lng`.
pub async fn update_task(
    id: String,
    name: Option<String>,
    due_at_ms: Option<i64>,
    lat: Option<f64>,
    lng: Option<f64>,
    clear_location: bool,
) -> TaskResponse {
    let location = if clear_location {
        Some(None)
    } else {
        match to_location(lat, lng) {
            Ok(Some(point)) => Some(Some(point)),
            Ok(None) => None,
            Err(message) => return TaskResponse::failure("validation_error", message),
        }
    };
    let patch = TaskPatch {
        name,
        due_at_ms,
        location,
        completed: None,
    };
    with_task(&id, "update_task", |service, task_id| async move {
        service.update_task(task_id, &patch).await
    })
    .await
}

/// Renames a task; the pending reminder text follows the new name.
pub async fn rename_task(id: String, name: String) -> TaskResponse {
    with_task(&id, "rename_task", |service, task_id| async move {
        service.rename_task(task_id, &name).await
    })
    .await
}

/// Flips the completion flag.
pub async fn toggle_completion(id: String) -> TaskResponse {
    with_task(&id, "toggle_completion", |service, task_id| async move {
        service.toggle_completion(task_id).await
    })
    .await
}

/// Deletes a task and cancels all of its triggers.
pub async fn delete_task(id: String) -> EngineResponse {
    let task_id = match parse_task_id(&id) {
        Ok(task_id) => task_id,
        Err(response) => return response,
    };
    let service = match engine() {
        Ok(service) => service,
        Err(err) => return EngineResponse::failure(err.code(), err.to_string()),
    };
    match service.delete_task(task_id).await {
        Ok(_) => EngineResponse::success("Task deleted."),
        Err(err) => EngineResponse::failure(err.code(), format!("delete_task failed: {err}")),
    }
}

/// Lists tasks in creation order with their trigger states.
#[flutter_rust_bridge::frb(sync)]
pub fn list_tasks() -> TaskListResponse {
    let result = engine().and_then(|service| {
        let items = service
            .list_tasks()?
            .iter()
            .map(|task| to_task_item(task, &service.trigger_status(task.id)))
            .collect::<Vec<_>>();
        Ok(items)
    });
    match result {
        Ok(items) => TaskListResponse {
            ok: true,
            error_code: None,
            message: format!("{} task(s).", items.len()),
            items,
        },
        Err(err) => TaskListResponse {
            ok: false,
            error_code: Some(err.code().to_string()),
            message: format!("list_tasks failed: {err}"),
            items: Vec::new(),
        },
    }
}

/// Host callback: a scheduled notification was delivered.
///
/// Returns whether an armed time trigger was consumed.
pub async fn notification_fired(id: String) -> bool {
    let (Ok(task_id), Ok(service)) = (TaskId::parse_str(id.trim()), engine()) else {
        return false;
    };
    service.on_notification_fired(task_id).await
}

/// Host callback: the device entered a monitored region.
pub async fn geofence_entered(id: String) -> EngineResponse {
    let task_id = match parse_task_id(&id) {
        Ok(task_id) => task_id,
        Err(response) => return response,
    };
    let service = match engine() {
        Ok(service) => service,
        Err(err) => return EngineResponse::failure(err.code(), err.to_string()),
    };
    match service.on_geofence_entered(task_id).await {
        Ok(outcome) => arrival_response(&outcome),
        Err(err) => EngineResponse::failure(err.code(), err.to_string()),
    }
}

/// Entry point of the background task registered under
/// `BACKGROUND-NOTIFICATION-TASK`.
///
/// # FFI contract
/// - Never fails the OS invocation; problems are reported in the envelope.
pub async fn run_background_task(
    error: Option<String>,
    geofence_task_id: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
) -> EngineResponse {
    let geofence = match geofence_task_id.as_deref().map(|raw| TaskId::parse_str(raw.trim())) {
        Some(Ok(task_id)) => Some(GeofenceEvent {
            task_id,
            position: to_location(lat, lng).ok().flatten(),
        }),
        Some(Err(_)) => {
            warn!("event=background_task module=ffi status=error error_code=invalid_id");
            None
        }
        None => None,
    };
    let service = match engine() {
        Ok(service) => service,
        Err(err) => return EngineResponse::failure(err.code(), err.to_string()),
    };

    let invocation = BackgroundInvocation { error, geofence };
    let outcome = handle_background_invocation(&*service, &invocation).await;
    match outcome.failures.first() {
        Some(code) => EngineResponse::failure(code, "Background task finished with errors."),
        None => EngineResponse::success(match &outcome.arrival {
            Some(arrival) => arrival_response(arrival).message,
            None => "Triggers reconciled.".to_string(),
        }),
    }
}

/// Re-applies every task's triggers.
pub async fn reconcile() -> EngineResponse {
    let service = match engine() {
        Ok(service) => service,
        Err(err) => return EngineResponse::failure(err.code(), err.to_string()),
    };
    match service.reconcile_now().await {
        Ok(summary) => EngineResponse::success(format!(
            "Reconciled {} task(s): {} adopted, {} cancelled, {} denied.",
            summary.tasks_seen, summary.adopted, summary.cancelled, summary.denied
        )),
        Err(err) => EngineResponse::failure(err.code(), err.to_string()),
    }
}

/// Cancels every registered trigger. Tasks stay stored.
pub async fn clear_all() -> EngineResponse {
    match runtime::clear_all().await {
        Ok(cancelled) => EngineResponse::success(format!("Cancelled {cancelled} trigger(s).")),
        Err(err) => EngineResponse::failure(err.code(), err.to_string()),
    }
}

/// Records the permissions the host currently holds.
#[flutter_rust_bridge::frb(sync)]
pub fn set_platform_permissions(notifications: bool, location: bool) {
    outbox().set_permissions(PlatformPermissions {
        notifications,
        location,
    });
}

/// Takes queued platform commands as JSON objects tagged by `op`.
#[flutter_rust_bridge::frb(sync)]
pub fn drain_platform_commands() -> Vec<String> {
    outbox()
        .drain()
        .iter()
        .filter_map(|command| match serde_json::to_string(command) {
            Ok(json) => Some(json),
            Err(err) => {
                warn!("event=outbox_drain module=ffi status=error error={err}");
                None
            }
        })
        .collect()
}

/// Seeds the outbox with what the OS still holds after a cold start.
///
/// Input: previously drained `schedule_notification` / `start_monitoring`
/// commands that are still live on the device. Must run before
/// `configure_engine` so reconciliation can adopt them.
#[flutter_rust_bridge::frb(sync)]
pub fn restore_platform_state(live_commands: Vec<String>) -> EngineResponse {
    let mut notifications = Vec::new();
    let mut regions = Vec::new();
    for raw in &live_commands {
        match serde_json::from_str::<PlatformCommand>(raw) {
            Ok(PlatformCommand::ScheduleNotification {
                handle,
                fire_at_ms,
                payload,
            }) => notifications.push(ScheduledNotification {
                handle,
                task_id: payload.task_id,
                fire_at_ms,
                payload,
            }),
            Ok(PlatformCommand::StartMonitoring {
                handle,
                task_id,
                center,
                radius_m,
            }) => regions.push(MonitoredRegion {
                handle,
                task_id,
                center,
                radius_m,
            }),
            Ok(_) => {}
            Err(err) => {
                return EngineResponse::failure("invalid_command", format!("{err}"));
            }
        }
    }
    let message = format!(
        "Restored {} notification(s) and {} region(s).",
        notifications.len(),
        regions.len()
    );
    outbox().restore(notifications, regions);
    EngineResponse::success(message)
}

fn outbox() -> Arc<PlatformOutbox> {
    OUTBOX.get_or_init(|| Arc::new(PlatformOutbox::new())).clone()
}

fn default_db_path() -> PathBuf {
    if let Ok(raw) = std::env::var(DB_PATH_ENV) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    std::env::temp_dir().join(DB_FILE_NAME)
}

fn configure(db_path: PathBuf, config: EngineConfig) -> Result<SharedService, EngineError> {
    let outbox = outbox();
    let mut options = RuntimeOptions::new(db_path, outbox.clone(), outbox);
    options.config = config;
    runtime::ensure_configured(options)
}

fn engine() -> Result<SharedService, EngineError> {
    match runtime::current() {
        Ok(service) => Ok(service),
        Err(EngineError::NotConfigured) => configure(default_db_path(), EngineConfig::default()),
        Err(err) => Err(err),
    }
}

async fn with_task<F, Fut>(id: &str, op: &str, run: F) -> TaskResponse
where
    F: FnOnce(SharedService, TaskId) -> Fut,
    Fut: std::future::Future<Output = Result<TaskReceipt, EngineError>>,
{
    let task_id = match TaskId::parse_str(id.trim()) {
        Ok(task_id) => task_id,
        Err(_) => return TaskResponse::failure("invalid_id", format!("invalid task id `{id}`")),
    };
    let service = match engine() {
        Ok(service) => service,
        Err(err) => return TaskResponse::failure(err.code(), err.to_string()),
    };
    match run(service, task_id).await {
        Ok(receipt) => TaskResponse::from_receipt("Task updated.", &receipt),
        Err(err) => TaskResponse::failure(err.code(), format!("{op} failed: {err}")),
    }
}

fn parse_task_id(id: &str) -> Result<TaskId, EngineResponse> {
    TaskId::parse_str(id.trim())
        .map_err(|_| EngineResponse::failure("invalid_id", format!("invalid task id `{id}`")))
}

fn to_location(lat: Option<f64>, lng: Option<f64>) -> Result<Option<GeoPoint>, String> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Ok(Some(GeoPoint::new(lat, lng))),
        (None, None) => Ok(None),
        _ => Err("lat and lng must be provided together".to_string()),
    }
}

fn to_task_item(task: &Task, report: &ScheduleReport) -> TaskItem {
    TaskItem {
        id: task.id.to_string(),
        name: task.name.clone(),
        due_at_ms: task.due_at_ms,
        lat: task.location.map(|point| point.lat),
        lng: task.location.map(|point| point.lng),
        completed: task.completed,
        time_trigger: report.time.as_str().to_string(),
        location_trigger: report.location.as_str().to_string(),
    }
}

fn arrival_response(outcome: &ArrivalOutcome) -> EngineResponse {
    match outcome {
        ArrivalOutcome::Notified => EngineResponse::success("Arrival notification shown."),
        ArrivalOutcome::Throttled { retry_after_ms } => EngineResponse::success(format!(
            "Arrival suppressed; next one allowed in {retry_after_ms} ms."
        )),
        ArrivalOutcome::Ignored => EngineResponse::success("No reminder for this region."),
        ArrivalOutcome::Denied { reason } => {
            EngineResponse::failure("scheduling_denied", reason.clone())
        }
    }
}
