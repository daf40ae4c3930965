//! Persistence layer for reminder tasks.
//!
//! # Responsibility
//! - Define the task store contract used by the scheduler and services.
//! - Keep SQLite and JSON encoding details behind that contract.
//!
//! # Invariants
//! - Store writes enforce `Task::validate()` before persistence.

pub mod task_store;
