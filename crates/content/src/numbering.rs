//! Position-number allocation and compaction helpers.

use lectern_core::{Conflict, CourseId, Error, Lecture, Module, ModuleId, Result};
use lectern_storage::Storage;

// Allocation races are resolved by the duplicate-number check in the
// storage layer; losers reallocate and try again a bounded number of
// times.
const ALLOCATION_RETRIES: usize = 3;

/// Save a new module at the end of its course, allocating the position
/// number just before the write.
pub(crate) async fn append_module<S: Storage>(storage: &S, mut module: Module) -> Result<Module> {
    let mut attempts = 0;
    loop {
        module.module_number = storage.next_module_number(module.course_id).await?;
        match storage.save_module(&module).await {
            Ok(()) => return Ok(module),
            Err(Error::Conflict(Conflict::DuplicateNumber { .. }))
                if attempts + 1 < ALLOCATION_RETRIES =>
            {
                attempts += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Save a new lecture at the end of its module, allocating the position
/// number just before the write.
pub(crate) async fn append_lecture<S: Storage>(
    storage: &S,
    mut lecture: Lecture,
) -> Result<Lecture> {
    let mut attempts = 0;
    loop {
        lecture.lecture_number = storage.next_lecture_number(lecture.module_id).await?;
        match storage.save_lecture(&lecture).await {
            Ok(()) => return Ok(lecture),
            Err(Error::Conflict(Conflict::DuplicateNumber { .. }))
                if attempts + 1 < ALLOCATION_RETRIES =>
            {
                attempts += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Close the gaps left in a course's module numbering. Walking the
/// survivors in ascending order only ever moves a number down, so no
/// transient collision is possible.
pub(crate) async fn compact_module_numbers<S: Storage>(
    storage: &S,
    course_id: CourseId,
) -> Result<()> {
    let modules = storage.modules_by_course(course_id, false).await?;
    for (position, module) in modules.iter().enumerate() {
        let want = position as u32 + 1;
        if module.module_number != want {
            storage.update_module_number(module.id, want).await?;
        }
    }
    Ok(())
}

/// Close the gaps left in a module's lecture numbering.
pub(crate) async fn compact_lecture_numbers<S: Storage>(
    storage: &S,
    module_id: ModuleId,
) -> Result<()> {
    let lectures = storage.lectures_by_module(module_id, false).await?;
    for (position, lecture) in lectures.iter().enumerate() {
        let want = position as u32 + 1;
        if lecture.lecture_number != want {
            storage.update_lecture_number(lecture.id, want).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lectern_core::Course;
    use lectern_storage::InMemoryStorage;

    #[tokio::test]
    async fn test_append_sequential() {
        let storage = InMemoryStorage::new();
        let course = Course::new("C", "", Utc::now());

        let first = append_module(&storage, Module::new(course.id, "A", 0, Utc::now()))
            .await
            .unwrap();
        let second = append_module(&storage, Module::new(course.id, "B", 0, Utc::now()))
            .await
            .unwrap();
        assert_eq!(first.module_number, 1);
        assert_eq!(second.module_number, 2);
    }

    #[tokio::test]
    async fn test_compact_gaps() {
        let storage = InMemoryStorage::new();
        let course = Course::new("C", "", Utc::now());
        for number in [1, 2, 3, 4] {
            storage
                .save_module(&Module::new(course.id, format!("M{number}"), number, Utc::now()))
                .await
                .unwrap();
        }

        // Drop number 2 and compact.
        let modules = storage.modules_by_course(course.id, false).await.unwrap();
        storage.delete_module(modules[1].id).await.unwrap();
        compact_module_numbers(&storage, course.id).await.unwrap();

        let renumbered = storage.modules_by_course(course.id, false).await.unwrap();
        let numbers: Vec<u32> = renumbered.iter().map(|m| m.module_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        // Relative order of the survivors is preserved.
        assert_eq!(renumbered[0].id, modules[0].id);
        assert_eq!(renumbered[1].id, modules[2].id);
        assert_eq!(renumbered[2].id, modules[3].id);
    }

    #[tokio::test]
    async fn test_compact_noop() {
        let storage = InMemoryStorage::new();
        let course = Course::new("C", "", Utc::now());
        let module = Module::new(course.id, "M", 1, Utc::now());
        storage.save_module(&module).await.unwrap();

        compact_module_numbers(&storage, course.id).await.unwrap();
        let unchanged = storage.find_module(module.id).await.unwrap().unwrap();
        assert_eq!(unchanged.updated_at, module.updated_at);
    }
}
