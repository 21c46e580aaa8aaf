//! Progress tracking for Lectern.
//!
//! Per-user, per-course progress records with sequential lecture
//! unlocking and cascading completion state.

#![warn(missing_docs)]

pub mod tracker;

pub use tracker::{BasicProgressTracker, ProgressTracker};
