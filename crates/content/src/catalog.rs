//! CRUD service for courses, modules and lectures.

use std::sync::Arc;

use async_trait::async_trait;
use lectern_core::{
    Course, CourseId, CourseUpdate, Entity, Error, Lecture, LectureId, LectureUpdate, Module,
    ModuleId, ModuleUpdate, NewCourse, NewLecture, NewModule, Result,
};
use lectern_storage::Storage;
use tracing::info;

use crate::aggregator::BasicStatsAggregator;
use crate::numbering::{
    append_lecture, append_module, compact_lecture_numbers, compact_module_numbers,
};

/// Catalog operations. Mutations keep position numbers gapless and the
/// cached aggregate counters in step with the content tree.
#[async_trait]
pub trait CatalogService: Send + Sync {
    // === Course operations ===

    /// Create a new course.
    async fn create_course(&self, spec: NewCourse) -> Result<Course>;

    /// Fetch a course by id.
    async fn get_course(&self, id: CourseId) -> Result<Course>;

    /// List courses, optionally only active ones.
    async fn list_courses(&self, active_only: bool) -> Result<Vec<Course>>;

    /// Apply a partial update to a course.
    async fn update_course(&self, id: CourseId, update: CourseUpdate) -> Result<Course>;

    /// Delete a course together with its modules, lectures and every
    /// user's progress records for it.
    async fn delete_course(&self, id: CourseId) -> Result<()>;

    // === Module operations ===

    /// Create a module at the end of a course.
    async fn create_module(&self, course_id: CourseId, spec: NewModule) -> Result<Module>;

    /// Fetch a module by id.
    async fn get_module(&self, id: ModuleId) -> Result<Module>;

    /// List a course's modules ordered by position.
    async fn list_modules(&self, course_id: CourseId, active_only: bool) -> Result<Vec<Module>>;

    /// Apply a partial update to a module.
    async fn update_module(&self, id: ModuleId, update: ModuleUpdate) -> Result<Module>;

    /// Delete a module and its lectures, closing the numbering gap.
    async fn delete_module(&self, id: ModuleId) -> Result<()>;

    // === Lecture operations ===

    /// Create a lecture at the end of a module.
    async fn create_lecture(&self, module_id: ModuleId, spec: NewLecture) -> Result<Lecture>;

    /// Fetch a lecture by id.
    async fn get_lecture(&self, id: LectureId) -> Result<Lecture>;

    /// List a module's lectures ordered by position.
    async fn list_lectures(&self, module_id: ModuleId, active_only: bool) -> Result<Vec<Lecture>>;

    /// Apply a partial update to a lecture.
    async fn update_lecture(&self, id: LectureId, update: LectureUpdate) -> Result<Lecture>;

    /// Delete a lecture, closing the numbering gap.
    async fn delete_lecture(&self, id: LectureId) -> Result<()>;
}

/// Basic catalog implementation.
pub struct BasicCatalogService<S: Storage> {
    storage: Arc<S>,
    aggregator: BasicStatsAggregator<S>,
}

impl<S: Storage + 'static> BasicCatalogService<S> {
    /// Create a new catalog service over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            aggregator: BasicStatsAggregator::new(storage.clone()),
            storage,
        }
    }
}

#[async_trait]
impl<S: Storage + 'static> CatalogService for BasicCatalogService<S> {
    async fn create_course(&self, spec: NewCourse) -> Result<Course> {
        let course = Course::new(spec.title, spec.description, chrono::Utc::now());
        self.storage.save_course(&course).await?;
        info!("created course {} \"{}\"", course.id, course.title);
        Ok(course)
    }

    async fn get_course(&self, id: CourseId) -> Result<Course> {
        self.storage
            .find_course(id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Course, id))
    }

    async fn list_courses(&self, active_only: bool) -> Result<Vec<Course>> {
        let mut courses = self.storage.list_courses().await?;
        if active_only {
            courses.retain(|c| c.is_active);
        }
        Ok(courses)
    }

    async fn update_course(&self, id: CourseId, update: CourseUpdate) -> Result<Course> {
        let mut course = self.get_course(id).await?;
        if let Some(title) = update.title {
            course.title = title;
        }
        if let Some(description) = update.description {
            course.description = description;
        }
        if let Some(is_active) = update.is_active {
            course.is_active = is_active;
        }
        course.updated_at = chrono::Utc::now();
        self.storage.save_course(&course).await?;
        info!("updated course {}", id);
        Ok(course)
    }

    async fn delete_course(&self, id: CourseId) -> Result<()> {
        // 1. The course must exist before the purge starts
        let course = self.get_course(id).await?;

        // 2. Remove the content tree, inactive records included
        let modules = self.storage.modules_by_course(id, false).await?;
        for module in &modules {
            for lecture in self.storage.lectures_by_module(module.id, false).await? {
                self.storage.delete_lecture(lecture.id).await?;
            }
            self.storage.delete_module(module.id).await?;
        }

        // 3. Remove every user's progress for the course
        let records = self.storage.progress_by_course(id).await?;
        for record in &records {
            self.storage.delete_progress(record.user_id, id).await?;
        }

        // 4. Remove the course itself
        self.storage.delete_course(id).await?;
        info!(
            "deleted course {} \"{}\" with {} modules and {} progress records",
            id,
            course.title,
            modules.len(),
            records.len()
        );
        Ok(())
    }

    async fn create_module(&self, course_id: CourseId, spec: NewModule) -> Result<Module> {
        // The parent must exist; the position number is allocated on save
        self.get_course(course_id).await?;
        let module = Module::new(course_id, spec.title, 0, chrono::Utc::now());
        let module = append_module(self.storage.as_ref(), module).await?;
        info!(
            "created module {} \"{}\" at position {} in course {}",
            module.id, module.title, module.module_number, course_id
        );
        self.aggregator.cascade_course(course_id).await;
        Ok(module)
    }

    async fn get_module(&self, id: ModuleId) -> Result<Module> {
        self.storage
            .find_module(id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Module, id))
    }

    async fn list_modules(&self, course_id: CourseId, active_only: bool) -> Result<Vec<Module>> {
        self.storage.modules_by_course(course_id, active_only).await
    }

    async fn update_module(&self, id: ModuleId, update: ModuleUpdate) -> Result<Module> {
        let mut module = self.get_module(id).await?;
        // Visibility changes move the module's lectures in or out of the
        // course counters
        let affects_stats = update.is_active.is_some_and(|a| a != module.is_active);
        if let Some(title) = update.title {
            module.title = title;
        }
        if let Some(is_active) = update.is_active {
            module.is_active = is_active;
        }
        module.updated_at = chrono::Utc::now();
        self.storage.save_module(&module).await?;
        info!("updated module {}", id);
        if affects_stats {
            self.aggregator.cascade_course(module.course_id).await;
        }
        Ok(module)
    }

    async fn delete_module(&self, id: ModuleId) -> Result<()> {
        // 1. Load the module; its lectures go with it
        let module = self.get_module(id).await?;
        for lecture in self.storage.lectures_by_module(id, false).await? {
            self.storage.delete_lecture(lecture.id).await?;
        }
        self.storage.delete_module(id).await?;

        // 2. Close the gap in the remaining positions
        compact_module_numbers(self.storage.as_ref(), module.course_id).await?;
        info!("deleted module {} from course {}", id, module.course_id);

        // 3. The course lost a module's worth of lectures
        self.aggregator.cascade_course(module.course_id).await;
        Ok(())
    }

    async fn create_lecture(&self, module_id: ModuleId, spec: NewLecture) -> Result<Lecture> {
        // The parent must exist; the position number is allocated on save
        let module = self.get_module(module_id).await?;
        let lecture = Lecture::new(
            module_id,
            module.course_id,
            spec.title,
            0,
            spec.duration,
            chrono::Utc::now(),
        );
        let lecture = append_lecture(self.storage.as_ref(), lecture).await?;
        info!(
            "created lecture {} \"{}\" at position {} in module {}",
            lecture.id, lecture.title, lecture.lecture_number, module_id
        );
        self.aggregator
            .cascade_from_module(module_id, module.course_id)
            .await;
        Ok(lecture)
    }

    async fn get_lecture(&self, id: LectureId) -> Result<Lecture> {
        self.storage
            .find_lecture(id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Lecture, id))
    }

    async fn list_lectures(&self, module_id: ModuleId, active_only: bool) -> Result<Vec<Lecture>> {
        self.storage
            .lectures_by_module(module_id, active_only)
            .await
    }

    async fn update_lecture(&self, id: LectureId, update: LectureUpdate) -> Result<Lecture> {
        let mut lecture = self.get_lecture(id).await?;
        // Duration and visibility feed the cached counters above
        let affects_stats = update.duration.is_some_and(|d| d != lecture.duration)
            || update.is_active.is_some_and(|a| a != lecture.is_active);
        if let Some(title) = update.title {
            lecture.title = title;
        }
        if let Some(duration) = update.duration {
            lecture.duration = duration;
        }
        if let Some(is_active) = update.is_active {
            lecture.is_active = is_active;
        }
        lecture.updated_at = chrono::Utc::now();
        self.storage.save_lecture(&lecture).await?;
        info!("updated lecture {}", id);
        if affects_stats {
            self.aggregator
                .cascade_from_module(lecture.module_id, lecture.course_id)
                .await;
        }
        Ok(lecture)
    }

    async fn delete_lecture(&self, id: LectureId) -> Result<()> {
        // 1. Load the lecture to learn its parents
        let lecture = self.get_lecture(id).await?;
        self.storage.delete_lecture(id).await?;

        // 2. Close the gap in the remaining positions
        compact_lecture_numbers(self.storage.as_ref(), lecture.module_id).await?;
        info!("deleted lecture {} from module {}", id, lecture.module_id);

        // 3. The module and the course lost its duration
        self.aggregator
            .cascade_from_module(lecture.module_id, lecture.course_id)
            .await;
        Ok(())
    }
}
