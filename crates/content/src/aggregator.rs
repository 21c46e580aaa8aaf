//! Derived-counter recomputation across the content hierarchy.

use async_trait::async_trait;
use lectern_core::{CourseId, CourseStats, Entity, Error, ModuleId, ModuleStats, Result};
use lectern_storage::Storage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Recomputes cached counters on parent records from their children.
///
/// Counters are always re-derived from the current children, never
/// incremented, so repeated or interleaved recomputes converge on the
/// same values instead of drifting.
#[async_trait]
pub trait StatsAggregator: Send + Sync {
    /// Recompute a module's counters from its active lectures and
    /// persist them on the module record.
    async fn recompute_module_stats(&self, module_id: ModuleId) -> Result<ModuleStats>;

    /// Recompute a course's counters from its active modules and,
    /// transitively, their active lectures.
    async fn recompute_course_stats(&self, course_id: CourseId) -> Result<CourseStats>;
}

/// Basic aggregator implementation.
pub struct BasicStatsAggregator<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage + 'static> BasicStatsAggregator<S> {
    /// Create a new aggregator over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Cascade step run after a committed lecture-level mutation: the
    /// owning module first, then the course. Failures here are logged
    /// and swallowed; the triggering mutation stays committed and the
    /// counters heal on the next successful recompute.
    pub async fn cascade_from_module(&self, module_id: ModuleId, course_id: CourseId) {
        if let Err(e) = self.recompute_module_stats(module_id).await {
            warn!("module stats recompute failed for {}: {}", module_id, e);
        }
        self.cascade_course(course_id).await;
    }

    /// Course-level half of the cascade, also run directly after module
    /// create/delete. Failures are logged and swallowed.
    pub async fn cascade_course(&self, course_id: CourseId) {
        if let Err(e) = self.recompute_course_stats(course_id).await {
            warn!("course stats recompute failed for {}: {}", course_id, e);
        }
    }
}

#[async_trait]
impl<S: Storage + 'static> StatsAggregator for BasicStatsAggregator<S> {
    async fn recompute_module_stats(&self, module_id: ModuleId) -> Result<ModuleStats> {
        // 1. Load the module
        let mut module = self
            .storage
            .find_module(module_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Module, module_id))?;

        // 2. Aggregate over its active lectures
        let lectures = self.storage.lectures_by_module(module_id, true).await?;
        let stats = ModuleStats {
            lecture_count: lectures.len() as u32,
            total_duration: lectures.iter().map(|l| l.duration).sum(),
        };

        // 3. Persist, skipping the write when nothing changed
        if module.lecture_count != stats.lecture_count
            || module.total_duration != stats.total_duration
        {
            module.lecture_count = stats.lecture_count;
            module.total_duration = stats.total_duration;
            module.updated_at = chrono::Utc::now();
            self.storage.save_module(&module).await?;
        }

        debug!(
            "module {} stats: {} lectures, {} min",
            module_id, stats.lecture_count, stats.total_duration
        );
        Ok(stats)
    }

    async fn recompute_course_stats(&self, course_id: CourseId) -> Result<CourseStats> {
        // 1. Load the course
        let mut course = self
            .storage
            .find_course(course_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Course, course_id))?;

        // 2. Aggregate over active modules and their active lectures.
        // Lectures are the ground truth; cached module counters are not
        // trusted here.
        let modules = self.storage.modules_by_course(course_id, true).await?;
        let mut total_lectures = 0u32;
        let mut total_duration = 0u32;
        for module in &modules {
            let lectures = self.storage.lectures_by_module(module.id, true).await?;
            total_lectures += lectures.len() as u32;
            total_duration += lectures.iter().map(|l| l.duration).sum::<u32>();
        }
        let stats = CourseStats {
            total_modules: modules.len() as u32,
            total_lectures,
            total_duration,
        };

        // 3. Persist, skipping the write when nothing changed
        if course.total_modules != stats.total_modules
            || course.total_lectures != stats.total_lectures
            || course.total_duration != stats.total_duration
        {
            course.total_modules = stats.total_modules;
            course.total_lectures = stats.total_lectures;
            course.total_duration = stats.total_duration;
            course.updated_at = chrono::Utc::now();
            self.storage.save_course(&course).await?;
        }

        debug!(
            "course {} stats: {} modules, {} lectures, {} min",
            course_id, stats.total_modules, stats.total_lectures, stats.total_duration
        );
        Ok(stats)
    }
}
