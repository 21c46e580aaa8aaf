//! Module model - an ordered section of a course.

use crate::id::{CourseId, ModuleId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// A module holds ordered lectures. Its number is unique and gapless
/// among the modules of its course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Unique identifier
    pub id: ModuleId,

    /// Owning course
    pub course_id: CourseId,

    /// Module title
    pub title: String,

    /// 1-based position within the course
    pub module_number: u32,

    /// Count of active lectures
    pub lecture_count: u32,

    /// Sum of active lecture durations, in minutes
    pub total_duration: u32,

    /// Soft-delete flag; inactive modules keep their lectures
    pub is_active: bool,

    /// When created
    pub created_at: Time,

    /// When last modified
    pub updated_at: Time,
}

impl Module {
    /// Creates an active module at the given position with zeroed counters.
    pub fn new(course_id: CourseId, title: impl Into<String>, module_number: u32, now: Time) -> Self {
        Self {
            id: ModuleId::new(),
            course_id,
            title: title.into(),
            module_number,
            lecture_count: 0,
            total_duration: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewModule {
    pub title: String,
}

/// Partial update for a module. Position changes go through reordering,
/// never through this struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleUpdate {
    pub title: Option<String>,
    pub is_active: Option<bool>,
}

/// Aggregate counters derived from a module's active lectures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStats {
    /// Count of active lectures
    pub lecture_count: u32,

    /// Sum of active lecture durations, in minutes
    pub total_duration: u32,
}
