//! Progress tracking service.

use std::sync::Arc;

use async_trait::async_trait;
use lectern_core::{
    CourseId, Entity, Error, LectureId, LectureState, ModuleProgress, Progress, ProgressUpdate,
    Result, UserId,
};
use lectern_storage::Storage;
use tracing::info;

/// Drives the per-(user, course) progress record. The record snapshots
/// the course hierarchy when it is created; later catalog changes do
/// not alter an existing record, only a reset picks them up.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Snapshot the course's active content for a user, replacing any
    /// record that already exists for the pair.
    async fn initialize_for_course(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Progress>;

    /// Fetch an existing record.
    async fn get(&self, user_id: UserId, course_id: CourseId) -> Result<Progress>;

    /// Fetch the record, snapshotting the course on first read.
    async fn get_or_initialize(&self, user_id: UserId, course_id: CourseId) -> Result<Progress>;

    /// Apply an activity report to one lecture and restore every
    /// derived counter up the record. A first report snapshots the
    /// course and lands as a single write; an unknown lecture is
    /// rejected before anything is stored.
    async fn update_lecture_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lecture_id: LectureId,
        update: ProgressUpdate,
    ) -> Result<Progress>;

    /// The lecture the learner should watch next, `None` once the
    /// course is fully completed.
    async fn next_unlocked_lecture(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<LectureId>>;

    /// Whether a lecture is currently accessible to the user.
    async fn is_lecture_unlocked(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lecture_id: LectureId,
    ) -> Result<bool>;

    /// Locked, unlocked or completed, for one lecture.
    async fn lecture_state(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lecture_id: LectureId,
    ) -> Result<LectureState>;

    /// Discard the record and snapshot the course afresh.
    async fn reset(&self, user_id: UserId, course_id: CourseId) -> Result<Progress>;

    /// Every progress record belonging to a user.
    async fn for_user(&self, user_id: UserId) -> Result<Vec<Progress>>;
}

/// Basic progress tracker implementation.
pub struct BasicProgressTracker<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage + 'static> BasicProgressTracker<S> {
    /// Create a new progress tracker over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Build the all-incomplete snapshot of a course's active content,
    /// modules and lectures in position order. Persists nothing.
    async fn build_snapshot(&self, user_id: UserId, course_id: CourseId) -> Result<Progress> {
        // The course must exist
        self.storage
            .find_course(course_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Course, course_id))?;

        let modules = self.storage.modules_by_course(course_id, true).await?;
        let mut entries = Vec::with_capacity(modules.len());
        for module in &modules {
            let lectures = self.storage.lectures_by_module(module.id, true).await?;
            entries.push(ModuleProgress::new(module, &lectures));
        }
        Ok(Progress::new(user_id, course_id, entries, chrono::Utc::now()))
    }
}

#[async_trait]
impl<S: Storage + 'static> ProgressTracker for BasicProgressTracker<S> {
    async fn initialize_for_course(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Progress> {
        let progress = self.build_snapshot(user_id, course_id).await?;

        // Replace whatever record existed for the pair
        self.storage.upsert_progress(&progress, None).await?;
        info!(
            "initialized progress for user {} in course {} ({} modules, {} lectures)",
            user_id, course_id, progress.total_modules, progress.total_lectures
        );
        Ok(progress)
    }

    async fn get(&self, user_id: UserId, course_id: CourseId) -> Result<Progress> {
        self.storage
            .find_progress(user_id, course_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(Entity::Progress, format!("{user_id}/{course_id}"))
            })
    }

    async fn get_or_initialize(&self, user_id: UserId, course_id: CourseId) -> Result<Progress> {
        if let Some(progress) = self.storage.find_progress(user_id, course_id).await? {
            return Ok(progress);
        }
        self.initialize_for_course(user_id, course_id).await
    }

    async fn update_lecture_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lecture_id: LectureId,
        update: ProgressUpdate,
    ) -> Result<Progress> {
        // 1. Load the record; a first report builds its snapshot in
        // memory, so nothing is written before the update is accepted
        let existing = self.storage.find_progress(user_id, course_id).await?;
        let loaded_version = existing.as_ref().map(|p| p.version);
        let mut progress = match existing {
            Some(progress) => progress,
            None => self.build_snapshot(user_id, course_id).await?,
        };

        // 2. The lecture must be part of the snapshot
        progress
            .apply_update(lecture_id, &update, chrono::Utc::now())
            .ok_or_else(|| Error::not_found(Entity::Lecture, lecture_id))?;

        // 3. Persist once. An existing record goes through optimistic
        // versioning and a concurrent writer surfaces as a
        // stale-version conflict; a first report lands unconditionally
        if let Some(loaded) = loaded_version {
            progress.version = loaded + 1;
        }
        self.storage
            .upsert_progress(&progress, loaded_version)
            .await?;
        info!(
            "user {} in course {}: {}% ({}/{} lectures)",
            user_id,
            course_id,
            progress.progress_percentage,
            progress.completed_lectures,
            progress.total_lectures
        );
        Ok(progress)
    }

    async fn next_unlocked_lecture(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<LectureId>> {
        let progress = self.get_or_initialize(user_id, course_id).await?;
        Ok(progress.next_unlocked())
    }

    async fn is_lecture_unlocked(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lecture_id: LectureId,
    ) -> Result<bool> {
        let progress = self.get_or_initialize(user_id, course_id).await?;
        progress
            .is_lecture_unlocked(lecture_id)
            .ok_or_else(|| Error::not_found(Entity::Lecture, lecture_id))
    }

    async fn lecture_state(
        &self,
        user_id: UserId,
        course_id: CourseId,
        lecture_id: LectureId,
    ) -> Result<LectureState> {
        let progress = self.get_or_initialize(user_id, course_id).await?;
        progress
            .lecture_state(lecture_id)
            .ok_or_else(|| Error::not_found(Entity::Lecture, lecture_id))
    }

    async fn reset(&self, user_id: UserId, course_id: CourseId) -> Result<Progress> {
        // The delete is tolerant of a record that never existed
        self.storage.delete_progress(user_id, course_id).await?;
        info!("reset progress for user {} in course {}", user_id, course_id);
        self.initialize_for_course(user_id, course_id).await
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<Progress>> {
        self.storage.progress_for_user(user_id).await
    }
}
