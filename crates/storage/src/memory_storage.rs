//! In-memory storage backend.
//!
//! Keeps every record in process memory behind a single lock. Useful
//! for tests and throwaway environments; nothing survives a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lectern_core::{
    Conflict, Course, CourseId, Entity, Error, Lecture, LectureId, Module, ModuleId, Progress,
    Result, UserId,
};
use tokio::sync::Mutex;

use super::trait_::Storage;

// One lock over all tables, so every trait call observes and mutates a
// consistent snapshot.
#[derive(Default)]
struct State {
    courses: HashMap<CourseId, Course>,
    modules: HashMap<ModuleId, Module>,
    lectures: HashMap<LectureId, Lecture>,
    progress: HashMap<(UserId, CourseId), Progress>,
}

/// In-memory storage implementation.
pub struct InMemoryStorage {
    state: Arc<Mutex<State>>,
}

impl InMemoryStorage {
    /// Create an empty in-memory storage.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn module_number_taken(state: &State, course_id: CourseId, skip: ModuleId, number: u32) -> bool {
    state
        .modules
        .values()
        .any(|m| m.course_id == course_id && m.id != skip && m.module_number == number)
}

fn lecture_number_taken(state: &State, module_id: ModuleId, skip: LectureId, number: u32) -> bool {
    state
        .lectures
        .values()
        .any(|l| l.module_id == module_id && l.id != skip && l.lecture_number == number)
}

#[async_trait]
impl Storage for InMemoryStorage {
    // === Course operations ===

    async fn save_course(&self, course: &Course) -> Result<()> {
        let mut state = self.state.lock().await;
        state.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn find_course(&self, id: CourseId) -> Result<Option<Course>> {
        let state = self.state.lock().await;
        Ok(state.courses.get(&id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let state = self.state.lock().await;
        let mut courses: Vec<Course> = state.courses.values().cloned().collect();
        courses.sort_by_key(|c| c.created_at);
        Ok(courses)
    }

    async fn delete_course(&self, id: CourseId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.courses.remove(&id);
        Ok(())
    }

    // === Module operations ===

    async fn save_module(&self, module: &Module) -> Result<()> {
        let mut state = self.state.lock().await;
        if module_number_taken(&state, module.course_id, module.id, module.module_number) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Module,
                number: module.module_number,
            }
            .into());
        }
        state.modules.insert(module.id, module.clone());
        Ok(())
    }

    async fn find_module(&self, id: ModuleId) -> Result<Option<Module>> {
        let state = self.state.lock().await;
        Ok(state.modules.get(&id).cloned())
    }

    async fn modules_by_course(
        &self,
        course_id: CourseId,
        active_only: bool,
    ) -> Result<Vec<Module>> {
        let state = self.state.lock().await;
        let mut modules: Vec<Module> = state
            .modules
            .values()
            .filter(|m| m.course_id == course_id && (!active_only || m.is_active))
            .cloned()
            .collect();
        modules.sort_by_key(|m| m.module_number);
        Ok(modules)
    }

    async fn next_module_number(&self, course_id: CourseId) -> Result<u32> {
        let state = self.state.lock().await;
        let max = state
            .modules
            .values()
            .filter(|m| m.course_id == course_id)
            .map(|m| m.module_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn update_module_number(&self, id: ModuleId, module_number: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let course_id = state
            .modules
            .get(&id)
            .map(|m| m.course_id)
            .ok_or_else(|| Error::not_found(Entity::Module, id))?;
        if module_number_taken(&state, course_id, id, module_number) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Module,
                number: module_number,
            }
            .into());
        }
        if let Some(module) = state.modules.get_mut(&id) {
            module.module_number = module_number;
            module.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn delete_module(&self, id: ModuleId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.modules.remove(&id);
        Ok(())
    }

    // === Lecture operations ===

    async fn save_lecture(&self, lecture: &Lecture) -> Result<()> {
        let mut state = self.state.lock().await;
        if lecture_number_taken(&state, lecture.module_id, lecture.id, lecture.lecture_number) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Lecture,
                number: lecture.lecture_number,
            }
            .into());
        }
        state.lectures.insert(lecture.id, lecture.clone());
        Ok(())
    }

    async fn find_lecture(&self, id: LectureId) -> Result<Option<Lecture>> {
        let state = self.state.lock().await;
        Ok(state.lectures.get(&id).cloned())
    }

    async fn lectures_by_module(
        &self,
        module_id: ModuleId,
        active_only: bool,
    ) -> Result<Vec<Lecture>> {
        let state = self.state.lock().await;
        let mut lectures: Vec<Lecture> = state
            .lectures
            .values()
            .filter(|l| l.module_id == module_id && (!active_only || l.is_active))
            .cloned()
            .collect();
        lectures.sort_by_key(|l| l.lecture_number);
        Ok(lectures)
    }

    async fn next_lecture_number(&self, module_id: ModuleId) -> Result<u32> {
        let state = self.state.lock().await;
        let max = state
            .lectures
            .values()
            .filter(|l| l.module_id == module_id)
            .map(|l| l.lecture_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn update_lecture_number(&self, id: LectureId, lecture_number: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let module_id = state
            .lectures
            .get(&id)
            .map(|l| l.module_id)
            .ok_or_else(|| Error::not_found(Entity::Lecture, id))?;
        if lecture_number_taken(&state, module_id, id, lecture_number) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Lecture,
                number: lecture_number,
            }
            .into());
        }
        if let Some(lecture) = state.lectures.get_mut(&id) {
            lecture.lecture_number = lecture_number;
            lecture.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn delete_lecture(&self, id: LectureId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.lectures.remove(&id);
        Ok(())
    }

    // === Progress operations ===

    async fn upsert_progress(
        &self,
        progress: &Progress,
        expected_version: Option<u64>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (progress.user_id, progress.course_id);
        if let Some(expected) = expected_version {
            match state.progress.get(&key) {
                None => {
                    return Err(Error::not_found(
                        Entity::Progress,
                        format!("{}/{}", progress.user_id, progress.course_id),
                    ))
                }
                Some(current) if current.version != expected => {
                    return Err(Conflict::StaleVersion {
                        expected,
                        found: current.version,
                    }
                    .into())
                }
                Some(_) => {}
            }
        }
        state.progress.insert(key, progress.clone());
        Ok(())
    }

    async fn find_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>> {
        let state = self.state.lock().await;
        Ok(state.progress.get(&(user_id, course_id)).cloned())
    }

    async fn progress_for_user(&self, user_id: UserId) -> Result<Vec<Progress>> {
        let state = self.state.lock().await;
        let mut records: Vec<Progress> = state
            .progress
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|p| p.started_at);
        Ok(records)
    }

    async fn progress_by_course(&self, course_id: CourseId) -> Result<Vec<Progress>> {
        let state = self.state.lock().await;
        let mut records: Vec<Progress> = state
            .progress
            .values()
            .filter(|p| p.course_id == course_id)
            .cloned()
            .collect();
        records.sort_by_key(|p| p.started_at);
        Ok(records)
    }

    async fn delete_progress(&self, user_id: UserId, course_id: CourseId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.progress.remove(&(user_id, course_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn course() -> Course {
        Course::new("Rust Basics", "From zero to ownership", Utc::now())
    }

    fn module(course: &Course, number: u32) -> Module {
        Module::new(course.id, format!("Module {number}"), number, Utc::now())
    }

    fn lecture(module: &Module, number: u32) -> Lecture {
        Lecture::new(
            module.id,
            module.course_id,
            format!("Lecture {number}"),
            number,
            10,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_course_round_trip() {
        let storage = InMemoryStorage::new();
        let course = course();

        storage.save_course(&course).await.unwrap();
        let loaded = storage.find_course(course.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, course.title);

        storage.delete_course(course.id).await.unwrap();
        assert!(storage.find_course(course.id).await.unwrap().is_none());
        // A second delete is a no-op.
        storage.delete_course(course.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_module_ordering() {
        let storage = InMemoryStorage::new();
        let course = course();
        storage.save_course(&course).await.unwrap();

        let second = module(&course, 2);
        let first = module(&course, 1);
        storage.save_module(&second).await.unwrap();
        storage.save_module(&first).await.unwrap();

        let listed = storage.modules_by_course(course.id, false).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[tokio::test]
    async fn test_active_filter() {
        let storage = InMemoryStorage::new();
        let course = course();
        let mut hidden = module(&course, 1);
        hidden.is_active = false;
        let visible = module(&course, 2);
        storage.save_module(&hidden).await.unwrap();
        storage.save_module(&visible).await.unwrap();

        let all = storage.modules_by_course(course.id, false).await.unwrap();
        assert_eq!(all.len(), 2);
        let active = storage.modules_by_course(course.id, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, visible.id);
    }

    #[tokio::test]
    async fn test_duplicate_module_number() {
        let storage = InMemoryStorage::new();
        let course = course();
        storage.save_module(&module(&course, 1)).await.unwrap();

        let clash = module(&course, 1);
        let err = storage.save_module(&clash).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(Conflict::DuplicateNumber { number: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_next_number_allocation() {
        let storage = InMemoryStorage::new();
        let course = course();
        assert_eq!(storage.next_module_number(course.id).await.unwrap(), 1);

        storage.save_module(&module(&course, 1)).await.unwrap();
        storage.save_module(&module(&course, 2)).await.unwrap();
        assert_eq!(storage.next_module_number(course.id).await.unwrap(), 3);

        let m = module(&course, 3);
        storage.save_module(&m).await.unwrap();
        let l = lecture(&m, 1);
        storage.save_lecture(&l).await.unwrap();
        assert_eq!(storage.next_lecture_number(m.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_renumber_collision() {
        let storage = InMemoryStorage::new();
        let course = course();
        let first = module(&course, 1);
        let second = module(&course, 2);
        storage.save_module(&first).await.unwrap();
        storage.save_module(&second).await.unwrap();

        let err = storage
            .update_module_number(second.id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        storage.update_module_number(second.id, 5).await.unwrap();
        let moved = storage.find_module(second.id).await.unwrap().unwrap();
        assert_eq!(moved.module_number, 5);
        assert!(moved.updated_at >= second.updated_at);
    }

    #[tokio::test]
    async fn test_renumber_missing_module() {
        let storage = InMemoryStorage::new();
        let err = storage
            .update_module_number(ModuleId::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: Entity::Module,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_progress_version_check() {
        let storage = InMemoryStorage::new();
        let user_id = UserId::new();
        let course_id = CourseId::new();
        let mut progress = Progress::new(user_id, course_id, vec![], Utc::now());

        // First write is unconditional.
        storage.upsert_progress(&progress, None).await.unwrap();

        // A write against the stored version lands.
        progress.version = 2;
        storage.upsert_progress(&progress, Some(1)).await.unwrap();

        // A write against a superseded version does not.
        progress.version = 3;
        let err = storage
            .upsert_progress(&progress, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(Conflict::StaleVersion {
                expected: 1,
                found: 2
            })
        ));

        let stored = storage
            .find_progress(user_id, course_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_conditional_upsert_missing() {
        let storage = InMemoryStorage::new();
        let progress = Progress::new(UserId::new(), CourseId::new(), vec![], Utc::now());
        let err = storage
            .upsert_progress(&progress, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: Entity::Progress,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_progress_listing() {
        let storage = InMemoryStorage::new();
        let user_id = UserId::new();
        let course_a = CourseId::new();
        let course_b = CourseId::new();
        let a = Progress::new(user_id, course_a, vec![], Utc::now());
        let b = Progress::new(user_id, course_b, vec![], Utc::now());
        let other = Progress::new(UserId::new(), course_a, vec![], Utc::now());
        storage.upsert_progress(&a, None).await.unwrap();
        storage.upsert_progress(&b, None).await.unwrap();
        storage.upsert_progress(&other, None).await.unwrap();

        assert_eq!(storage.progress_for_user(user_id).await.unwrap().len(), 2);
        assert_eq!(storage.progress_by_course(course_a).await.unwrap().len(), 2);

        storage.delete_progress(user_id, course_a).await.unwrap();
        assert_eq!(storage.progress_for_user(user_id).await.unwrap().len(), 1);
    }
}
