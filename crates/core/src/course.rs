//! Course model - root of the content hierarchy.

use crate::id::CourseId;
use crate::Time;
use serde::{Deserialize, Serialize};

/// A course groups ordered modules and carries denormalized totals
/// recomputed from its children after every structural change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    /// Unique identifier
    pub id: CourseId,

    /// Course title
    pub title: String,

    /// Description
    pub description: String,

    /// Count of active modules
    pub total_modules: u32,

    /// Count of active lectures across all active modules
    pub total_lectures: u32,

    /// Sum of active lecture durations, in minutes
    pub total_duration: u32,

    /// Soft-delete flag; inactive courses keep their children
    pub is_active: bool,

    /// When created
    pub created_at: Time,

    /// When last modified
    pub updated_at: Time,
}

impl Course {
    /// Creates an active course with zeroed counters.
    pub fn new(title: impl Into<String>, description: impl Into<String>, now: Time) -> Self {
        Self {
            id: CourseId::new(),
            title: title.into(),
            description: description.into(),
            total_modules: 0,
            total_lectures: 0,
            total_duration: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
}

/// Partial update for a course. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Aggregate counters derived from a course's active children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseStats {
    /// Count of active modules
    pub total_modules: u32,

    /// Count of active lectures
    pub total_lectures: u32,

    /// Sum of active lecture durations, in minutes
    pub total_duration: u32,
}
