//! Reminder use-case services.
//!
//! # Responsibility
//! - Expose the task operations the UI layer calls.
//! - Keep UI/FFI layers decoupled from storage and sink details.

pub mod reminder_service;
