//! Flutter bridge for the reminder engine.

pub mod api;
