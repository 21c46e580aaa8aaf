//! JSON file storage implementation.
//!
//! Stores each record as a JSON file under a data directory, one
//! subdirectory per entity kind. Compound operations (number checks,
//! versioned progress writes) hold an internal lock so in-process
//! callers cannot interleave their read-check-write sequences.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lectern_core::{
    Conflict, Course, CourseId, Entity, Error, Lecture, LectureId, Module, ModuleId, Progress,
    Result, UserId,
};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use super::trait_::Storage;

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the entity
    /// subdirectories if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("courses")).await?;
        fs::create_dir_all(root.join("modules")).await?;
        fs::create_dir_all(root.join("lectures")).await?;
        fs::create_dir_all(root.join("progress")).await?;

        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn course_path(&self, id: CourseId) -> PathBuf {
        self.root.join("courses").join(format!("{}.json", id))
    }
    fn module_path(&self, id: ModuleId) -> PathBuf {
        self.root.join("modules").join(format!("{}.json", id))
    }
    fn lecture_path(&self, id: LectureId) -> PathBuf {
        self.root.join("lectures").join(format!("{}.json", id))
    }
    fn progress_path(&self, user_id: UserId, course_id: CourseId) -> PathBuf {
        self.root
            .join("progress")
            .join(format!("{}_{}.json", user_id, course_id))
    }

    async fn modules_in(&self, course_id: CourseId) -> Result<Vec<Module>> {
        let all: Vec<Module> = list_dir(&self.root.join("modules")).await?;
        Ok(all.into_iter().filter(|m| m.course_id == course_id).collect())
    }

    async fn lectures_in(&self, module_id: ModuleId) -> Result<Vec<Lecture>> {
        let all: Vec<Lecture> = list_dir(&self.root.join("lectures")).await?;
        Ok(all.into_iter().filter(|l| l.module_id == module_id).collect())
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for JsonStorage {
    // === Course operations ===

    async fn save_course(&self, course: &Course) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(&self.course_path(course.id), course).await
    }

    async fn find_course(&self, id: CourseId) -> Result<Option<Course>> {
        read_json(&self.course_path(id)).await
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let mut courses: Vec<Course> = list_dir(&self.root.join("courses")).await?;
        courses.sort_by_key(|c| c.created_at);
        Ok(courses)
    }

    async fn delete_course(&self, id: CourseId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_file(&self.course_path(id)).await
    }

    // === Module operations ===

    async fn save_module(&self, module: &Module) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let taken = self.modules_in(module.course_id).await?.into_iter().any(|m| {
            m.id != module.id && m.module_number == module.module_number
        });
        if taken {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Module,
                number: module.module_number,
            }
            .into());
        }
        self.write_json(&self.module_path(module.id), module).await
    }

    async fn find_module(&self, id: ModuleId) -> Result<Option<Module>> {
        read_json(&self.module_path(id)).await
    }

    async fn modules_by_course(
        &self,
        course_id: CourseId,
        active_only: bool,
    ) -> Result<Vec<Module>> {
        let mut modules = self.modules_in(course_id).await?;
        if active_only {
            modules.retain(|m| m.is_active);
        }
        modules.sort_by_key(|m| m.module_number);
        Ok(modules)
    }

    async fn next_module_number(&self, course_id: CourseId) -> Result<u32> {
        let max = self
            .modules_in(course_id)
            .await?
            .iter()
            .map(|m| m.module_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn update_module_number(&self, id: ModuleId, module_number: u32) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut module: Module = read_json(&self.module_path(id))
            .await?
            .ok_or_else(|| Error::not_found(Entity::Module, id))?;
        let taken = self
            .modules_in(module.course_id)
            .await?
            .into_iter()
            .any(|m| m.id != id && m.module_number == module_number);
        if taken {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Module,
                number: module_number,
            }
            .into());
        }
        module.module_number = module_number;
        module.updated_at = chrono::Utc::now();
        self.write_json(&self.module_path(id), &module).await
    }

    async fn delete_module(&self, id: ModuleId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_file(&self.module_path(id)).await
    }

    // === Lecture operations ===

    async fn save_lecture(&self, lecture: &Lecture) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let taken = self.lectures_in(lecture.module_id).await?.into_iter().any(|l| {
            l.id != lecture.id && l.lecture_number == lecture.lecture_number
        });
        if taken {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Lecture,
                number: lecture.lecture_number,
            }
            .into());
        }
        self.write_json(&self.lecture_path(lecture.id), lecture).await
    }

    async fn find_lecture(&self, id: LectureId) -> Result<Option<Lecture>> {
        read_json(&self.lecture_path(id)).await
    }

    async fn lectures_by_module(
        &self,
        module_id: ModuleId,
        active_only: bool,
    ) -> Result<Vec<Lecture>> {
        let mut lectures = self.lectures_in(module_id).await?;
        if active_only {
            lectures.retain(|l| l.is_active);
        }
        lectures.sort_by_key(|l| l.lecture_number);
        Ok(lectures)
    }

    async fn next_lecture_number(&self, module_id: ModuleId) -> Result<u32> {
        let max = self
            .lectures_in(module_id)
            .await?
            .iter()
            .map(|l| l.lecture_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn update_lecture_number(&self, id: LectureId, lecture_number: u32) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut lecture: Lecture = read_json(&self.lecture_path(id))
            .await?
            .ok_or_else(|| Error::not_found(Entity::Lecture, id))?;
        let taken = self
            .lectures_in(lecture.module_id)
            .await?
            .into_iter()
            .any(|l| l.id != id && l.lecture_number == lecture_number);
        if taken {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Lecture,
                number: lecture_number,
            }
            .into());
        }
        lecture.lecture_number = lecture_number;
        lecture.updated_at = chrono::Utc::now();
        self.write_json(&self.lecture_path(id), &lecture).await
    }

    async fn delete_lecture(&self, id: LectureId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_file(&self.lecture_path(id)).await
    }

    // === Progress operations ===

    async fn upsert_progress(
        &self,
        progress: &Progress,
        expected_version: Option<u64>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.progress_path(progress.user_id, progress.course_id);
        if let Some(expected) = expected_version {
            let current: Option<Progress> = read_json(&path).await?;
            match current {
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
        self.write_json(&path, progress).await
    }

    async fn find_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>> {
        read_json(&self.progress_path(user_id, course_id)).await
    }

    async fn progress_for_user(&self, user_id: UserId) -> Result<Vec<Progress>> {
        let all: Vec<Progress> = list_dir(&self.root.join("progress")).await?;
        let mut records: Vec<Progress> =
            all.into_iter().filter(|p| p.user_id == user_id).collect();
        records.sort_by_key(|p| p.started_at);
        Ok(records)
    }

    async fn progress_by_course(&self, course_id: CourseId) -> Result<Vec<Progress>> {
        let all: Vec<Progress> = list_dir(&self.root.join("progress")).await?;
        let mut records: Vec<Progress> =
            all.into_iter().filter(|p| p.course_id == course_id).collect();
        records.sort_by_key(|p| p.started_at);
        Ok(records)
    }

    async fn delete_progress(&self, user_id: UserId, course_id: CourseId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        remove_file(&self.progress_path(user_id, course_id)).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!("skipping unreadable record {}: {}", entry.path().display(), e),
        }
    }
    Ok(items)
}

async fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).await.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Ok(())
        } else {
            Err(e)
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn open(dir: &tempfile::TempDir) -> JsonStorage {
        JsonStorage::new(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_reopen_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let course = Course::new("Persistent", "", Utc::now());
        {
            let storage = open(&dir).await;
            storage.save_course(&course).await.unwrap();
        }

        let reopened = open(&dir).await;
        let loaded = reopened.find_course(course.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Persistent");
    }

    #[tokio::test]
    async fn test_lecture_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir).await;
        let course = Course::new("C", "", Utc::now());
        let module = Module::new(course.id, "M", 1, Utc::now());
        storage.save_module(&module).await.unwrap();

        let third = Lecture::new(module.id, course.id, "L3", 3, 5, Utc::now());
        let first = Lecture::new(module.id, course.id, "L1", 1, 5, Utc::now());
        storage.save_lecture(&third).await.unwrap();
        storage.save_lecture(&first).await.unwrap();

        let listed = storage.lectures_by_module(module.id, false).await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, third.id);
        assert_eq!(storage.next_lecture_number(module.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_lecture_number() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir).await;
        let course = Course::new("C", "", Utc::now());
        let module = Module::new(course.id, "M", 1, Utc::now());
        let lecture = Lecture::new(module.id, course.id, "L", 1, 5, Utc::now());
        storage.save_lecture(&lecture).await.unwrap();

        let clash = Lecture::new(module.id, course.id, "L again", 1, 5, Utc::now());
        let err = storage.save_lecture(&clash).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Re-saving the same record is an update, not a clash.
        storage.save_lecture(&lecture).await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir).await;
        let mut progress = Progress::new(UserId::new(), CourseId::new(), vec![], Utc::now());
        storage.upsert_progress(&progress, None).await.unwrap();

        progress.version = 2;
        storage.upsert_progress(&progress, Some(1)).await.unwrap();

        progress.version = 9;
        let err = storage
            .upsert_progress(&progress, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(Conflict::StaleVersion { found: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir).await;
        storage.delete_module(ModuleId::new()).await.unwrap();
        storage
            .delete_progress(UserId::new(), CourseId::new())
            .await
            .unwrap();
    }
}
