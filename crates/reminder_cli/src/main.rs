//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `reminder_core` linkage without the Flutter/FFI runtime.
//! - Walk one deterministic reminder day against in-memory sinks and a
//!   manual clock.

use reminder_core::db::open_db_in_memory;
use reminder_core::sink::memory::{MemoryGeofenceSink, MemoryNotificationSink};
use reminder_core::{
    Clock, EngineConfig, EngineResult, GeoPoint, ManualClock, ReminderService, SqliteTaskStore,
};
use std::sync::Arc;

const START_MS: i64 = 1_700_000_000_000;
const MINUTE_MS: i64 = 60_000;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("reminder_core ping={}", reminder_core::ping());
    println!("reminder_core version={}", reminder_core::core_version());

    if let Err(err) = run_demo().await {
        eprintln!("demo failed: code={} error={err}", err.code());
        std::process::exit(1);
    }
}

async fn run_demo() -> EngineResult<()> {
    let conn = open_db_in_memory().map_err(reminder_core::StorageError::from)?;
    let store = Arc::new(SqliteTaskStore::try_new(conn)?);
    let notifications = Arc::new(MemoryNotificationSink::new());
    let geofences = Arc::new(MemoryGeofenceSink::new());
    let clock = Arc::new(ManualClock::new(START_MS));
    let service = ReminderService::new(
        store,
        notifications.clone(),
        geofences.clone(),
        EngineConfig::default(),
        clock.clone(),
    );

    let water = service.add_task("Water", START_MS + MINUTE_MS, None).await?;
    let gym = service
        .add_task("Gym", START_MS + 90 * MINUTE_MS, Some(GeoPoint::new(37.0, -122.0)))
        .await?;
    let late = service.add_task("Yesterday", START_MS - MINUTE_MS, None).await?;
    for receipt in [&water, &gym, &late] {
        println!(
            "add task={} time={} location={} past_due={}",
            receipt.task.id,
            receipt.report.time.as_str(),
            receipt.report.location.as_str(),
            receipt.report.past_due.is_some()
        );
    }

    let now = clock.advance(MINUTE_MS);
    for fired in notifications.fire_due(now) {
        let consumed = service.on_notification_fired(fired.task_id).await;
        println!("fired task={} at={} consumed={consumed}", fired.task_id, fired.fire_at_ms);
    }

    for task_id in geofences.regions_containing(GeoPoint::new(37.0004, -122.0002)) {
        let outcome = service.on_geofence_entered(task_id).await?;
        println!("arrival task={task_id} outcome={outcome:?}");
    }

    let summary = service.reconcile_on_startup(clock.now_ms()).await?;
    println!(
        "reconcile tasks={} armed_time={} armed_location={} past_due={}",
        summary.tasks_seen, summary.armed_time, summary.armed_location, summary.past_due
    );

    service.delete_task(gym.task.id).await?;
    println!(
        "after delete pending={} regions={}",
        notifications.pending().len(),
        geofences.regions().len()
    );
    Ok(())
}
