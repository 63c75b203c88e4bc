//! Client-side sync core for collaborative venue seating layouts.
//!
//! Surfaces (layout editor, check-in desk) each run a [`room::Room`] per
//! event. The room merges local edits, pushed notifications, and pulled
//! canonical state into one reconciled view, and autosaves committed
//! geometry back to the canonical store.

pub mod autosave;
pub mod buffer;
pub mod channel;
pub mod checkin;
pub mod config;
pub mod frame;
pub mod geometry;
pub mod model;
pub mod notification;
pub mod reconcile;
pub mod room;
pub mod store;

#[cfg(test)]
pub mod test_helpers;
