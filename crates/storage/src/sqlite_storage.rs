//! SQLite storage backend.
//!
//! Content records are stored as JSON documents in a single `entities`
//! table; progress records get their own table so the version check on
//! conditional writes stays a plain column comparison.

use async_trait::async_trait;
use lectern_core::{
    Conflict, Course, CourseId, Entity, Error, Lecture, LectureId, Module, ModuleId, Progress,
    Result, UserId,
};
use sqlx::Row;
use std::path::Path;

use super::trait_::Storage;

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance, creating the database file
    /// if it does not exist.
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = sqlx::SqlitePool::connect_with(options)
            .await
            .map_err(Error::storage)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create a new SQLite storage instance from a path.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        Self::new(path.to_str().unwrap_or(":memory:")).await
    }

    /// Create an in-memory SQLite storage for testing. Pinned to a
    /// single connection because each SQLite `:memory:` connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .map_err(Error::storage)?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        // Entities table stores courses, modules and lectures as JSON
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type)")
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;

        // Progress keyed by (user_id, course_id) with a version column
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS progress (
                user_id TEXT NOT NULL,
                course_id TEXT NOT NULL,
                data TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, course_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;

        Ok(())
    }

    /// Helper to extract string from row.
    fn get_string(row: &sqlx::sqlite::SqliteRow, column: &str) -> String {
        row.try_get(column).unwrap_or_default()
    }

    fn decode_rows<T: serde::de::DeserializeOwned>(
        rows: Vec<sqlx::sqlite::SqliteRow>,
    ) -> Result<Vec<T>> {
        rows.into_iter()
            .map(|row| {
                let data = Self::get_string(&row, "data");
                serde_json::from_str(&data).map_err(Error::from)
            })
            .collect()
    }

    async fn put_entity(&self, id: String, entity_type: &str, data: String) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO entities (id, entity_type, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(entity_type)
        .bind(data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;

        Ok(())
    }

    async fn find_entity<T: serde::de::DeserializeOwned>(
        &self,
        id: String,
        entity_type: &str,
    ) -> Result<Option<T>> {
        let row = sqlx::query("SELECT data FROM entities WHERE id = ? AND entity_type = ?")
            .bind(id)
            .bind(entity_type)
            .fetch_one(&self.pool)
            .await;

        match row {
            Ok(row) => {
                let data = Self::get_string(&row, "data");
                Ok(Some(serde_json::from_str(&data)?))
            }
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(e) => Err(Error::storage(e)),
        }
    }

    async fn load_modules(&self, course_id: CourseId) -> Result<Vec<Module>> {
        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'module'")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        let modules: Vec<Module> = Self::decode_rows(rows)?;
        Ok(modules
            .into_iter()
            .filter(|m| m.course_id == course_id)
            .collect())
    }

    async fn load_lectures(&self, module_id: ModuleId) -> Result<Vec<Lecture>> {
        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'lecture'")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        let lectures: Vec<Lecture> = Self::decode_rows(rows)?;
        Ok(lectures
            .into_iter()
            .filter(|l| l.module_id == module_id)
            .collect())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    // === Course operations ===

    async fn save_course(&self, course: &Course) -> Result<()> {
        let data = serde_json::to_string(course)?;
        self.put_entity(course.id.to_string(), "course", data).await
    }

    async fn find_course(&self, id: CourseId) -> Result<Option<Course>> {
        self.find_entity(id.to_string(), "course").await
    }

    async fn list_courses(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'course'")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        let mut courses: Vec<Course> = Self::decode_rows(rows)?;
        courses.sort_by_key(|c| c.created_at);
        Ok(courses)
    }

    async fn delete_course(&self, id: CourseId) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE id = ? AND entity_type = 'course'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    // === Module operations ===

    async fn save_module(&self, module: &Module) -> Result<()> {
        // Sibling check and write share one transaction so concurrent
        // saves cannot both pass the check
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'module'")
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let siblings: Vec<Module> = Self::decode_rows(rows)?;
        if siblings.iter().any(|m| {
            m.course_id == module.course_id
                && m.id != module.id
                && m.module_number == module.module_number
        }) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Module,
                number: module.module_number,
            }
            .into());
        }

        let data = serde_json::to_string(module)?;
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO entities (id, entity_type, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(module.id.to_string())
        .bind("module")
        .bind(data)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn find_module(&self, id: ModuleId) -> Result<Option<Module>> {
        self.find_entity(id.to_string(), "module").await
    }

    async fn modules_by_course(
        &self,
        course_id: CourseId,
        active_only: bool,
    ) -> Result<Vec<Module>> {
        let mut modules = self.load_modules(course_id).await?;
        if active_only {
            modules.retain(|m| m.is_active);
        }
        modules.sort_by_key(|m| m.module_number);
        Ok(modules)
    }

    async fn next_module_number(&self, course_id: CourseId) -> Result<u32> {
        let max = self
            .load_modules(course_id)
            .await?
            .iter()
            .map(|m| m.module_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn update_module_number(&self, id: ModuleId, module_number: u32) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let row = sqlx::query("SELECT data FROM entities WHERE id = ? AND entity_type = 'module'")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await;
        let mut module: Module = match row {
            Ok(row) => serde_json::from_str(&Self::get_string(&row, "data"))?,
            Err(sqlx::Error::RowNotFound) => return Err(Error::not_found(Entity::Module, id)),
            Err(e) => return Err(Error::storage(e)),
        };

        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'module'")
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let siblings: Vec<Module> = Self::decode_rows(rows)?;
        if siblings.iter().any(|m| {
            m.course_id == module.course_id && m.id != id && m.module_number == module_number
        }) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Module,
                number: module_number,
            }
            .into());
        }

        module.module_number = module_number;
        module.updated_at = chrono::Utc::now();
        let data = serde_json::to_string(&module)?;
        sqlx::query("UPDATE entities SET data = ?, updated_at = ? WHERE id = ?")
            .bind(data)
            .bind(module.updated_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn delete_module(&self, id: ModuleId) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE id = ? AND entity_type = 'module'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    // === Lecture operations ===

    async fn save_lecture(&self, lecture: &Lecture) -> Result<()> {
        // Same transactional shape as save_module
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'lecture'")
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let siblings: Vec<Lecture> = Self::decode_rows(rows)?;
        if siblings.iter().any(|l| {
            l.module_id == lecture.module_id
                && l.id != lecture.id
                && l.lecture_number == lecture.lecture_number
        }) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Lecture,
                number: lecture.lecture_number,
            }
            .into());
        }

        let data = serde_json::to_string(lecture)?;
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR REPLACE INTO entities (id, entity_type, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(lecture.id.to_string())
        .bind("lecture")
        .bind(data)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn find_lecture(&self, id: LectureId) -> Result<Option<Lecture>> {
        self.find_entity(id.to_string(), "lecture").await
    }

    async fn lectures_by_module(
        &self,
        module_id: ModuleId,
        active_only: bool,
    ) -> Result<Vec<Lecture>> {
        let mut lectures = self.load_lectures(module_id).await?;
        if active_only {
            lectures.retain(|l| l.is_active);
        }
        lectures.sort_by_key(|l| l.lecture_number);
        Ok(lectures)
    }

    async fn next_lecture_number(&self, module_id: ModuleId) -> Result<u32> {
        let max = self
            .load_lectures(module_id)
            .await?
            .iter()
            .map(|l| l.lecture_number)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn update_lecture_number(&self, id: LectureId, lecture_number: u32) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        let row = sqlx::query("SELECT data FROM entities WHERE id = ? AND entity_type = 'lecture'")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await;
        let mut lecture: Lecture = match row {
            Ok(row) => serde_json::from_str(&Self::get_string(&row, "data"))?,
            Err(sqlx::Error::RowNotFound) => return Err(Error::not_found(Entity::Lecture, id)),
            Err(e) => return Err(Error::storage(e)),
        };

        let rows = sqlx::query("SELECT data FROM entities WHERE entity_type = 'lecture'")
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::storage)?;
        let siblings: Vec<Lecture> = Self::decode_rows(rows)?;
        if siblings.iter().any(|l| {
            l.module_id == lecture.module_id && l.id != id && l.lecture_number == lecture_number
        }) {
            return Err(Conflict::DuplicateNumber {
                scope: Entity::Lecture,
                number: lecture_number,
            }
            .into());
        }

        lecture.lecture_number = lecture_number;
        lecture.updated_at = chrono::Utc::now();
        let data = serde_json::to_string(&lecture)?;
        sqlx::query("UPDATE entities SET data = ?, updated_at = ? WHERE id = ?")
            .bind(data)
            .bind(lecture.updated_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::storage)?;

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn delete_lecture(&self, id: LectureId) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE id = ? AND entity_type = 'lecture'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }

    // === Progress operations ===

    async fn upsert_progress(
        &self,
        progress: &Progress,
        expected_version: Option<u64>,
    ) -> Result<()> {
        let data = serde_json::to_string(progress)?;
        let now = chrono::Utc::now().to_rfc3339();

        match expected_version {
            None => {
                sqlx::query(
                    "INSERT OR REPLACE INTO progress (user_id, course_id, data, version, updated_at)
                    VALUES (?, ?, ?, ?, ?)",
                )
                .bind(progress.user_id.to_string())
                .bind(progress.course_id.to_string())
                .bind(data)
                .bind(progress.version as i64)
                .bind(&now)
                .execute(&self.pool)
                .await
                .map_err(Error::storage)?;
            }
            Some(expected) => {
                let mut tx = self.pool.begin().await.map_err(Error::storage)?;

                let row =
                    sqlx::query("SELECT version FROM progress WHERE user_id = ? AND course_id = ?")
                        .bind(progress.user_id.to_string())
                        .bind(progress.course_id.to_string())
                        .fetch_one(&mut *tx)
                        .await;
                let found: i64 = match row {
                    Ok(row) => row.try_get("version").map_err(Error::storage)?,
                    Err(sqlx::Error::RowNotFound) => {
                        return Err(Error::not_found(
                            Entity::Progress,
                            format!("{}/{}", progress.user_id, progress.course_id),
                        ))
                    }
                    Err(e) => return Err(Error::storage(e)),
                };
                if found as u64 != expected {
                    return Err(Conflict::StaleVersion {
                        expected,
                        found: found as u64,
                    }
                    .into());
                }

                sqlx::query(
                    "UPDATE progress SET data = ?, version = ?, updated_at = ?
                    WHERE user_id = ? AND course_id = ?",
                )
                .bind(data)
                .bind(progress.version as i64)
                .bind(&now)
                .bind(progress.user_id.to_string())
                .bind(progress.course_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(Error::storage)?;

                tx.commit().await.map_err(Error::storage)?;
            }
        }

        Ok(())
    }

    async fn find_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>> {
        let row = sqlx::query("SELECT data FROM progress WHERE user_id = ? AND course_id = ?")
            .bind(user_id.to_string())
            .bind(course_id.to_string())
            .fetch_one(&self.pool)
            .await;

        match row {
            Ok(row) => {
                let data = Self::get_string(&row, "data");
                Ok(Some(serde_json::from_str(&data)?))
            }
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(e) => Err(Error::storage(e)),
        }
    }

    async fn progress_for_user(&self, user_id: UserId) -> Result<Vec<Progress>> {
        let rows = sqlx::query("SELECT data FROM progress WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        let mut records: Vec<Progress> = Self::decode_rows(rows)?;
        records.sort_by_key(|p| p.started_at);
        Ok(records)
    }

    async fn progress_by_course(&self, course_id: CourseId) -> Result<Vec<Progress>> {
        let rows = sqlx::query("SELECT data FROM progress WHERE course_id = ?")
            .bind(course_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        let mut records: Vec<Progress> = Self::decode_rows(rows)?;
        records.sort_by_key(|p| p.started_at);
        Ok(records)
    }

    async fn delete_progress(&self, user_id: UserId, course_id: CourseId) -> Result<()> {
        sqlx::query("DELETE FROM progress WHERE user_id = ? AND course_id = ?")
            .bind(user_id.to_string())
            .bind(course_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_course_round_trip() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let course = Course::new("SQL-backed", "", Utc::now());

        storage.save_course(&course).await.unwrap();
        let loaded = storage.find_course(course.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, course.title);
        assert_eq!(loaded.id, course.id);

        storage.delete_course(course.id).await.unwrap();
        assert!(storage.find_course(course.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_module_ordering_and_uniqueness() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let course = Course::new("C", "", Utc::now());
        let second = Module::new(course.id, "Second", 2, Utc::now());
        let first = Module::new(course.id, "First", 1, Utc::now());
        storage.save_module(&second).await.unwrap();
        storage.save_module(&first).await.unwrap();

        let listed = storage.modules_by_course(course.id, false).await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert_eq!(storage.next_module_number(course.id).await.unwrap(), 3);

        let clash = Module::new(course.id, "Clash", 1, Utc::now());
        let err = storage.save_module(&clash).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // The same number under another course is fine.
        let elsewhere = Module::new(CourseId::new(), "Elsewhere", 1, Utc::now());
        storage.save_module(&elsewhere).await.unwrap();
    }

    #[tokio::test]
    async fn test_renumber_rewrite() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let course = Course::new("C", "", Utc::now());
        let module = Module::new(course.id, "M", 1, Utc::now());
        storage.save_module(&module).await.unwrap();

        storage.update_module_number(module.id, 4).await.unwrap();
        let loaded = storage.find_module(module.id).await.unwrap().unwrap();
        assert_eq!(loaded.module_number, 4);
    }

    #[tokio::test]
    async fn test_progress_version_check() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let mut progress = Progress::new(UserId::new(), CourseId::new(), vec![], Utc::now());
        storage.upsert_progress(&progress, None).await.unwrap();

        progress.version = 2;
        storage.upsert_progress(&progress, Some(1)).await.unwrap();

        progress.version = 7;
        let err = storage
            .upsert_progress(&progress, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(Conflict::StaleVersion { found: 2, .. })
        ));

        let stored = storage
            .find_progress(progress.user_id, progress.course_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_concurrent_module_saves_same_number() {
        for _ in 0..8 {
            let storage = SqliteStorage::in_memory().await.unwrap();
            let course = Course::new("C", "", Utc::now());
            let left = Module::new(course.id, "Left", 1, Utc::now());
            let right = Module::new(course.id, "Right", 1, Utc::now());

            let (a, b) = tokio::join!(storage.save_module(&left), storage.save_module(&right));
            assert!(a.is_ok() ^ b.is_ok());
            let err = a.err().or(b.err()).unwrap();
            assert!(matches!(
                err,
                Error::Conflict(Conflict::DuplicateNumber {
                    scope: Entity::Module,
                    number: 1,
                })
            ));

            let stored = storage.modules_by_course(course.id, false).await.unwrap();
            assert_eq!(stored.len(), 1);
            assert_eq!(stored[0].module_number, 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_lecture_saves_same_number() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let module = Module::new(CourseId::new(), "M", 1, Utc::now());
        storage.save_module(&module).await.unwrap();
        let left = Lecture::new(module.id, module.course_id, "L", 1, 10, Utc::now());
        let right = Lecture::new(module.id, module.course_id, "R", 1, 10, Utc::now());

        let (a, b) = tokio::join!(storage.save_lecture(&left), storage.save_lecture(&right));
        assert!(a.is_ok() ^ b.is_ok());

        let stored = storage.lectures_by_module(module.id, false).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].lecture_number, 1);
    }
}
