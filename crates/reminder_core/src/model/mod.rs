//! Reminder domain model.
//!
//! # Responsibility
//! - Define the canonical task schema and the triggers derived from it.
//!
//! # Invariants
//! - Every task is identified by a stable `TaskId`.
//! - Triggers are derived data and are never persisted on their own.

pub mod task;
pub mod trigger;
