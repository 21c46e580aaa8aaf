//! Lectern core data models.
//!
//! This crate defines the content hierarchy (course, module, lecture),
//! the per-user progress snapshot, and the shared error taxonomy used
//! by every other Lectern crate.

#![warn(missing_docs)]

// Core identities
mod id;

// Content hierarchy
mod course;
mod lecture;
mod module;

// Learner progress
mod progress;

// Error taxonomy
mod error;

// Re-exports
pub use id::*;

// Content hierarchy
pub use course::{Course, CourseStats, CourseUpdate, NewCourse};
pub use lecture::{Lecture, LectureUpdate, NewLecture};
pub use module::{Module, ModuleStats, ModuleUpdate, NewModule};

// Learner progress
pub use progress::{
    percentage, LectureProgress, LectureState, ModuleProgress, Progress, ProgressStatus,
    ProgressUpdate,
};

// Errors
pub use error::{Conflict, Entity, Error, Result, Validation};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
