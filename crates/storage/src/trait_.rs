//! Storage trait abstraction.

use async_trait::async_trait;
use lectern_core::{
    Course, CourseId, Lecture, LectureId, Module, ModuleId, Progress, Result, UserId,
};

/// Storage abstraction for Lectern data.
///
/// This trait allows different storage backends to be plugged in. All
/// listing queries return children ordered by their position number.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Course operations ===

    /// Save a course (create or update).
    async fn save_course(&self, course: &Course) -> Result<()>;

    /// Load a course by ID.
    async fn find_course(&self, id: CourseId) -> Result<Option<Course>>;

    /// List all courses, oldest first.
    async fn list_courses(&self) -> Result<Vec<Course>>;

    /// Delete a course. Missing records are ignored.
    async fn delete_course(&self, id: CourseId) -> Result<()>;

    // === Module operations ===

    /// Save a module (create or update). Rejects a position number
    /// already held by a sibling with `Conflict::DuplicateNumber`.
    async fn save_module(&self, module: &Module) -> Result<()>;

    /// Load a module by ID.
    async fn find_module(&self, id: ModuleId) -> Result<Option<Module>>;

    /// List a course's modules ordered by `module_number`.
    async fn modules_by_course(&self, course_id: CourseId, active_only: bool) -> Result<Vec<Module>>;

    /// Highest sibling `module_number` plus one. Callers racing on the
    /// same course are caught by the uniqueness check in `save_module`
    /// and retry.
    async fn next_module_number(&self, course_id: CourseId) -> Result<u32>;

    /// Move a module to a new position number, bumping `updated_at`.
    /// Rejects numbers held by a sibling with `Conflict::DuplicateNumber`.
    async fn update_module_number(&self, id: ModuleId, module_number: u32) -> Result<()>;

    /// Delete a module. Missing records are ignored.
    async fn delete_module(&self, id: ModuleId) -> Result<()>;

    // === Lecture operations ===

    /// Save a lecture (create or update). Rejects a position number
    /// already held by a sibling with `Conflict::DuplicateNumber`.
    async fn save_lecture(&self, lecture: &Lecture) -> Result<()>;

    /// Load a lecture by ID.
    async fn find_lecture(&self, id: LectureId) -> Result<Option<Lecture>>;

    /// List a module's lectures ordered by `lecture_number`.
    async fn lectures_by_module(&self, module_id: ModuleId, active_only: bool)
        -> Result<Vec<Lecture>>;

    /// Highest sibling `lecture_number` plus one.
    async fn next_lecture_number(&self, module_id: ModuleId) -> Result<u32>;

    /// Move a lecture to a new position number, bumping `updated_at`.
    /// Rejects numbers held by a sibling with `Conflict::DuplicateNumber`.
    async fn update_lecture_number(&self, id: LectureId, lecture_number: u32) -> Result<()>;

    /// Delete a lecture. Missing records are ignored.
    async fn delete_lecture(&self, id: LectureId) -> Result<()>;

    // === Progress operations ===

    /// Write the progress record for its `(user_id, course_id)` key.
    ///
    /// With `expected_version: None` the write is unconditional and
    /// replaces any prior record. With `Some(v)` the write only lands
    /// if the stored record still carries version `v`; otherwise
    /// `Conflict::StaleVersion` (or `NotFound` if the record vanished)
    /// is returned and the caller should reload and retry.
    async fn upsert_progress(&self, progress: &Progress, expected_version: Option<u64>)
        -> Result<()>;

    /// Load the progress record for a user and course.
    async fn find_progress(&self, user_id: UserId, course_id: CourseId)
        -> Result<Option<Progress>>;

    /// List all progress records of one user, oldest first.
    async fn progress_for_user(&self, user_id: UserId) -> Result<Vec<Progress>>;

    /// List all progress records taken from one course.
    async fn progress_by_course(&self, course_id: CourseId) -> Result<Vec<Progress>>;

    /// Delete the progress record for a user and course. Missing
    /// records are ignored.
    async fn delete_progress(&self, user_id: UserId, course_id: CourseId) -> Result<()>;
}
