//! Lecture model - the unit learners actually watch.

use crate::id::{CourseId, LectureId, ModuleId};
use crate::Time;
use serde::{Deserialize, Serialize};

/// A lecture inside a module. Its number is unique and gapless among
/// the lectures of its module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lecture {
    /// Unique identifier
    pub id: LectureId,

    /// Owning module
    pub module_id: ModuleId,

    /// Owning course, denormalized for direct lookups
    pub course_id: CourseId,

    /// Lecture title
    pub title: String,

    /// 1-based position within the module
    pub lecture_number: u32,

    /// Playback length, in minutes
    pub duration: u32,

    /// Soft-delete flag
    pub is_active: bool,

    /// When created
    pub created_at: Time,

    /// When last modified
    pub updated_at: Time,
}

impl Lecture {
    /// Creates an active lecture at the given position.
    pub fn new(
        module_id: ModuleId,
        course_id: CourseId,
        title: impl Into<String>,
        lecture_number: u32,
        duration: u32,
        now: Time,
    ) -> Self {
        Self {
            id: LectureId::new(),
            module_id,
            course_id,
            title: title.into(),
            lecture_number,
            duration,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating a lecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLecture {
    pub title: String,

    /// Playback length, in minutes
    pub duration: u32,
}

/// Partial update for a lecture. Position changes go through reordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LectureUpdate {
    pub title: Option<String>,
    pub duration: Option<u32>,
    pub is_active: Option<bool>,
}
