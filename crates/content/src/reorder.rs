//! Renumbering and duplication of modules and lectures.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lectern_core::{
    CourseId, Entity, Error, Lecture, LectureId, Module, ModuleId, Result, Validation,
};
use lectern_storage::Storage;
use tracing::info;

use crate::aggregator::BasicStatsAggregator;
use crate::numbering::{append_lecture, append_module};

/// Renumbers children within a parent while keeping position numbers
/// unique at every instant, and deep-copies subtrees.
#[async_trait]
pub trait ReorderCoordinator: Send + Sync {
    /// Renumber a course's modules to match the given order. The list
    /// must name every module of the course exactly once.
    async fn reorder_modules(
        &self,
        course_id: CourseId,
        ordered: &[ModuleId],
    ) -> Result<Vec<Module>>;

    /// Renumber a module's lectures to match the given order. The list
    /// must name every lecture of the module exactly once.
    async fn reorder_lectures(
        &self,
        module_id: ModuleId,
        ordered: &[LectureId],
    ) -> Result<Vec<Lecture>>;

    /// Deep-copy a module and its active lectures to the end of the
    /// same course, titled with a `" (Copy)"` suffix.
    async fn duplicate_module(&self, module_id: ModuleId) -> Result<Module>;

    /// Copy a lecture to the end of the same module, titled with a
    /// `" (Copy)"` suffix.
    async fn duplicate_lecture(&self, lecture_id: LectureId) -> Result<Lecture>;
}

/// Basic coordinator implementation.
pub struct BasicReorderCoordinator<S: Storage> {
    storage: Arc<S>,
    aggregator: BasicStatsAggregator<S>,
}

impl<S: Storage + 'static> BasicReorderCoordinator<S> {
    /// Create a new coordinator over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            aggregator: BasicStatsAggregator::new(storage.clone()),
            storage,
        }
    }
}

/// The requested order must be a permutation of the known children.
fn check_permutation<I: std::hash::Hash + Eq + Copy + ToString>(
    ordered: &[I],
    known: &[I],
    entity: Entity,
    parent: Entity,
    parent_id: String,
) -> Result<()> {
    if ordered.is_empty() {
        return Err(Validation::EmptySet.into());
    }
    let known_set: HashSet<I> = known.iter().copied().collect();
    for id in ordered {
        if !known_set.contains(id) {
            return Err(Validation::ForeignEntity {
                entity,
                id: id.to_string(),
                parent,
                parent_id,
            }
            .into());
        }
    }
    let unique: HashSet<I> = ordered.iter().copied().collect();
    if unique.len() != ordered.len() || unique.len() != known.len() {
        return Err(Validation::IncompleteSet {
            expected: known.len(),
            got: ordered.len(),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl<S: Storage + 'static> ReorderCoordinator for BasicReorderCoordinator<S> {
    async fn reorder_modules(
        &self,
        course_id: CourseId,
        ordered: &[ModuleId],
    ) -> Result<Vec<Module>> {
        // 1. Validate the requested order before touching anything
        let modules = self.storage.modules_by_course(course_id, false).await?;
        let known: Vec<ModuleId> = modules.iter().map(|m| m.id).collect();
        check_permutation(
            ordered,
            &known,
            Entity::Module,
            Entity::Course,
            course_id.to_string(),
        )?;

        // 2. Park everything in an offset range clear of both the
        // current and the final numbers, so the uniqueness constraint
        // holds at every step
        let offset = modules.iter().map(|m| m.module_number).max().unwrap_or(0);
        for (position, id) in ordered.iter().enumerate() {
            self.storage
                .update_module_number(*id, offset + position as u32 + 1)
                .await?;
        }

        // 3. Assign the final numbers in the requested order
        for (position, id) in ordered.iter().enumerate() {
            self.storage
                .update_module_number(*id, position as u32 + 1)
                .await?;
        }

        info!("reordered {} modules in course {}", ordered.len(), course_id);
        self.storage.modules_by_course(course_id, false).await
    }

    async fn reorder_lectures(
        &self,
        module_id: ModuleId,
        ordered: &[LectureId],
    ) -> Result<Vec<Lecture>> {
        // 1. Validate the requested order before touching anything
        let lectures = self.storage.lectures_by_module(module_id, false).await?;
        let known: Vec<LectureId> = lectures.iter().map(|l| l.id).collect();
        check_permutation(
            ordered,
            &known,
            Entity::Lecture,
            Entity::Module,
            module_id.to_string(),
        )?;

        // 2. Park in the offset range
        let offset = lectures.iter().map(|l| l.lecture_number).max().unwrap_or(0);
        for (position, id) in ordered.iter().enumerate() {
            self.storage
                .update_lecture_number(*id, offset + position as u32 + 1)
                .await?;
        }

        // 3. Assign the final numbers
        for (position, id) in ordered.iter().enumerate() {
            self.storage
                .update_lecture_number(*id, position as u32 + 1)
                .await?;
        }

        info!("reordered {} lectures in module {}", ordered.len(), module_id);
        self.storage.lectures_by_module(module_id, false).await
    }

    async fn duplicate_module(&self, module_id: ModuleId) -> Result<Module> {
        // 1. Load the source module and its active lectures
        let source = self
            .storage
            .find_module(module_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Module, module_id))?;
        let lectures = self.storage.lectures_by_module(module_id, true).await?;
        let now = chrono::Utc::now();

        // 2. Copy the module shell to the end of the course
        let mut copy = Module::new(
            source.course_id,
            format!("{} (Copy)", source.title),
            0,
            now,
        );
        copy.is_active = source.is_active;
        let copy = append_module(self.storage.as_ref(), copy).await?;

        // 3. Copy the lectures, keeping their position numbers
        for lecture in &lectures {
            let duplicate = Lecture::new(
                copy.id,
                source.course_id,
                lecture.title.clone(),
                lecture.lecture_number,
                lecture.duration,
                now,
            );
            self.storage.save_lecture(&duplicate).await?;
        }

        info!(
            "duplicated module {} as {} with {} lectures",
            module_id,
            copy.id,
            lectures.len()
        );

        // 4. The copies changed both module- and course-level counters
        self.aggregator
            .cascade_from_module(copy.id, source.course_id)
            .await;
        let refreshed = self.storage.find_module(copy.id).await?;
        Ok(refreshed.unwrap_or(copy))
    }

    async fn duplicate_lecture(&self, lecture_id: LectureId) -> Result<Lecture> {
        // 1. Load the source lecture
        let source = self
            .storage
            .find_lecture(lecture_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Lecture, lecture_id))?;
        let now = chrono::Utc::now();

        // 2. Copy it to the end of the same module
        let mut copy = Lecture::new(
            source.module_id,
            source.course_id,
            format!("{} (Copy)", source.title),
            0,
            source.duration,
            now,
        );
        copy.is_active = source.is_active;
        let copy = append_lecture(self.storage.as_ref(), copy).await?;

        info!("duplicated lecture {} as {}", lecture_id, copy.id);

        // 3. One more lecture in the module and the course
        self.aggregator
            .cascade_from_module(source.module_id, source.course_id)
            .await;
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::StatsAggregator;
    use chrono::Utc;
    use lectern_core::{Conflict, Course};
    use lectern_storage::InMemoryStorage;

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        coordinator: BasicReorderCoordinator<InMemoryStorage>,
        course: Course,
        modules: Vec<Module>,
        lectures: Vec<Lecture>,
    }

    /// Course with modules A (two lectures) and B (one lecture).
    async fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let course = Course::new("C", "", Utc::now());
        storage.save_course(&course).await.unwrap();

        let module_a = Module::new(course.id, "A", 1, Utc::now());
        let module_b = Module::new(course.id, "B", 2, Utc::now());
        storage.save_module(&module_a).await.unwrap();
        storage.save_module(&module_b).await.unwrap();

        let mut lectures = Vec::new();
        for (number, duration) in [(1, 10), (2, 20)] {
            let lecture = Lecture::new(
                module_a.id,
                course.id,
                format!("A{number}"),
                number,
                duration,
                Utc::now(),
            );
            storage.save_lecture(&lecture).await.unwrap();
            lectures.push(lecture);
        }
        let b1 = Lecture::new(module_b.id, course.id, "B1", 1, 30, Utc::now());
        storage.save_lecture(&b1).await.unwrap();
        lectures.push(b1);

        Fixture {
            coordinator: BasicReorderCoordinator::new(storage.clone()),
            storage,
            course,
            modules: vec![module_a, module_b],
            lectures,
        }
    }

    #[tokio::test]
    async fn test_reorder_modules() {
        let fx = fixture().await;
        let reordered = fx
            .coordinator
            .reorder_modules(fx.course.id, &[fx.modules[1].id, fx.modules[0].id])
            .await
            .unwrap();

        assert_eq!(reordered[0].id, fx.modules[1].id);
        assert_eq!(reordered[0].module_number, 1);
        assert_eq!(reordered[1].id, fx.modules[0].id);
        assert_eq!(reordered[1].module_number, 2);
    }

    #[tokio::test]
    async fn test_reorder_gapless() {
        let fx = fixture().await;
        // Add two more modules and shuffle all four.
        let c = Module::new(fx.course.id, "C", 3, Utc::now());
        let d = Module::new(fx.course.id, "D", 4, Utc::now());
        fx.storage.save_module(&c).await.unwrap();
        fx.storage.save_module(&d).await.unwrap();

        let order = [d.id, fx.modules[0].id, c.id, fx.modules[1].id];
        let reordered = fx
            .coordinator
            .reorder_modules(fx.course.id, &order)
            .await
            .unwrap();

        let numbers: Vec<u32> = reordered.iter().map(|m| m.module_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        let ids: Vec<ModuleId> = reordered.iter().map(|m| m.id).collect();
        assert_eq!(ids, order.to_vec());
    }

    #[tokio::test]
    async fn test_reorder_preserves_stats() {
        let fx = fixture().await;
        let aggregator = BasicStatsAggregator::new(fx.storage.clone());
        aggregator
            .recompute_module_stats(fx.modules[0].id)
            .await
            .unwrap();
        aggregator
            .recompute_module_stats(fx.modules[1].id)
            .await
            .unwrap();

        let before: Vec<(u32, u32)> = fx
            .storage
            .modules_by_course(fx.course.id, false)
            .await
            .unwrap()
            .iter()
            .map(|m| (m.lecture_count, m.total_duration))
            .collect();

        fx.coordinator
            .reorder_modules(fx.course.id, &[fx.modules[1].id, fx.modules[0].id])
            .await
            .unwrap();

        let mut after: Vec<(u32, u32)> = fx
            .storage
            .modules_by_course(fx.course.id, false)
            .await
            .unwrap()
            .iter()
            .map(|m| (m.lecture_count, m.total_duration))
            .collect();
        after.reverse();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_reorder_validation() {
        let fx = fixture().await;

        let err = fx
            .coordinator
            .reorder_modules(fx.course.id, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(Validation::EmptySet)));

        let foreign = ModuleId::new();
        let err = fx
            .coordinator
            .reorder_modules(fx.course.id, &[foreign, fx.modules[0].id])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(Validation::ForeignEntity { .. })
        ));

        let err = fx
            .coordinator
            .reorder_modules(fx.course.id, &[fx.modules[0].id])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(Validation::IncompleteSet {
                expected: 2,
                got: 1
            })
        ));

        let err = fx
            .coordinator
            .reorder_modules(fx.course.id, &[fx.modules[0].id, fx.modules[0].id])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(Validation::IncompleteSet { .. })
        ));

        // Nothing moved.
        let untouched = fx
            .storage
            .modules_by_course(fx.course.id, false)
            .await
            .unwrap();
        assert_eq!(untouched[0].module_number, 1);
        assert_eq!(untouched[1].module_number, 2);
    }

    #[tokio::test]
    async fn test_reorder_lectures() {
        let fx = fixture().await;
        let module_a = &fx.modules[0];
        let reordered = fx
            .coordinator
            .reorder_lectures(module_a.id, &[fx.lectures[1].id, fx.lectures[0].id])
            .await
            .unwrap();

        assert_eq!(reordered[0].id, fx.lectures[1].id);
        assert_eq!(reordered[0].lecture_number, 1);
        assert_eq!(reordered[1].id, fx.lectures[0].id);
        assert_eq!(reordered[1].lecture_number, 2);

        // Module B's lone lecture keeps its number.
        let b = fx
            .storage
            .lectures_by_module(fx.modules[1].id, false)
            .await
            .unwrap();
        assert_eq!(b[0].lecture_number, 1);
    }

    #[tokio::test]
    async fn test_duplicate_module() {
        let fx = fixture().await;

        // Deactivate one lecture; the copy should skip it.
        let mut hidden = fx.lectures[1].clone();
        hidden.is_active = false;
        fx.storage.save_lecture(&hidden).await.unwrap();

        let copy = fx
            .coordinator
            .duplicate_module(fx.modules[0].id)
            .await
            .unwrap();

        assert_eq!(copy.title, "A (Copy)");
        assert_eq!(copy.module_number, 3);
        assert_eq!(copy.lecture_count, 1);
        assert_eq!(copy.total_duration, 10);

        let copied = fx
            .storage
            .lectures_by_module(copy.id, false)
            .await
            .unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].title, "A1");
        assert_eq!(copied[0].lecture_number, 1);
        assert_ne!(copied[0].id, fx.lectures[0].id);

        // Course counters include the copy.
        let course = fx
            .storage
            .find_course(fx.course.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(course.total_modules, 3);
        assert_eq!(course.total_lectures, 3);
    }

    #[tokio::test]
    async fn test_duplicate_lecture() {
        let fx = fixture().await;
        let copy = fx
            .coordinator
            .duplicate_lecture(fx.lectures[0].id)
            .await
            .unwrap();

        assert_eq!(copy.title, "A1 (Copy)");
        assert_eq!(copy.module_id, fx.modules[0].id);
        assert_eq!(copy.lecture_number, 3);
        assert_eq!(copy.duration, 10);

        let module = fx
            .storage
            .find_module(fx.modules[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(module.lecture_count, 3);
        assert_eq!(module.total_duration, 40);
    }

    #[tokio::test]
    async fn test_duplicate_missing_source() {
        let fx = fixture().await;
        let err = fx
            .coordinator
            .duplicate_module(ModuleId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: Entity::Module,
                ..
            }
        ));

        let err = fx
            .coordinator
            .duplicate_lecture(LectureId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: Entity::Lecture,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_offset_avoids_collision() {
        let fx = fixture().await;
        // Direct sequential renumbering of [1,2] to [2,1] would collide
        // immediately; the coordinator's parking phase avoids it.
        let err = fx
            .storage
            .update_module_number(fx.modules[0].id, 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(Conflict::DuplicateNumber { .. })
        ));

        fx.coordinator
            .reorder_modules(fx.course.id, &[fx.modules[1].id, fx.modules[0].id])
            .await
            .unwrap();
    }
}
