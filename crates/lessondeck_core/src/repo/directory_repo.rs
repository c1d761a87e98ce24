//! User and lesson directory lookups.
//!
//! # Responsibility
//! - Resolve weak user references by id at persistence time.
//! - Supply lesson metadata consumed when a deck is mounted.
//! - Seed the local mirror of both directories (CLI and tests).
//!
//! # Invariants
//! - Unknown ids return `Ok(None)`, never an error, so callers can
//!   skip-and-continue.

use crate::model::deck::{LessonId, UserId};
use crate::model::lesson::{Lesson, UserRecord};
use crate::repo::deck_repo::RepoResult;
use rusqlite::{params, Connection, OptionalExtension};

/// Point lookups against the user directory.
pub trait UserDirectory {
    fn find_user(&self, user_id: &str) -> RepoResult<Option<UserRecord>>;
}

/// Point lookups against the lesson/resource store.
pub trait LessonDirectory {
    fn find_lesson(&self, lesson_id: &str) -> RepoResult<Option<Lesson>>;
}

/// SQLite-backed user directory.
///
/// Accepts any connection, including an open transaction, so lookups observe
/// the same snapshot as the writes they guard.
pub struct SqliteUserDirectory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserDirectory<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts or refreshes one directory entry.
    pub fn upsert_user(&self, user: &UserRecord) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO users (id, name, image) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, image = excluded.image;",
            params![user.id.as_str(), user.name.as_str(), user.image.as_deref()],
        )?;
        Ok(())
    }

    pub fn remove_user(&self, user_id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1;", [user_id])?;
        Ok(changed > 0)
    }
}

impl UserDirectory for SqliteUserDirectory<'_> {
    fn find_user(&self, user_id: &str) -> RepoResult<Option<UserRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, name, image FROM users WHERE id = ?1;",
                [user_id],
                |row| {
                    Ok(UserRecord {
                        id: row.get::<_, UserId>(0)?,
                        name: row.get(1)?,
                        image: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

/// SQLite-backed lesson directory.
pub struct SqliteLessonDirectory<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLessonDirectory<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts or refreshes one lesson entry.
    pub fn upsert_lesson(
        &self,
        lesson_id: &str,
        title: &str,
        resource_url: Option<&str>,
    ) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO lessons (id, title, resource_url) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                resource_url = excluded.resource_url;",
            params![lesson_id, title, resource_url],
        )?;
        Ok(())
    }
}

impl LessonDirectory for SqliteLessonDirectory<'_> {
    fn find_lesson(&self, lesson_id: &str) -> RepoResult<Option<Lesson>> {
        let lesson = self
            .conn
            .query_row(
                "SELECT
                    l.id,
                    l.title,
                    l.resource_url,
                    EXISTS(SELECT 1 FROM slides s WHERE s.lesson_id = l.id) AS has_deck
                 FROM lessons l
                 WHERE l.id = ?1;",
                [lesson_id],
                |row| {
                    Ok(Lesson {
                        id: row.get::<_, LessonId>(0)?,
                        title: row.get(1)?,
                        resource_url: row.get(2)?,
                        has_deck: row.get::<_, i64>(3)? == 1,
                    })
                },
            )
            .optional()?;
        Ok(lesson)
    }
}

#[cfg(test)]
mod tests {
    use super::{LessonDirectory, SqliteLessonDirectory, SqliteUserDirectory, UserDirectory};
    use crate::db::open_db_in_memory;
    use crate::model::lesson::UserRecord;

    #[test]
    fn unknown_user_resolves_to_none() {
        let conn = open_db_in_memory().unwrap();
        let users = SqliteUserDirectory::new(&conn);
        assert!(users.find_user("U-missing").unwrap().is_none());
    }

    #[test]
    fn upsert_user_refreshes_display_data() {
        let conn = open_db_in_memory().unwrap();
        let users = SqliteUserDirectory::new(&conn);
        let mut user = UserRecord {
            id: "U1".to_string(),
            name: "Ada".to_string(),
            image: None,
        };
        users.upsert_user(&user).unwrap();
        user.name = "Ada L.".to_string();
        users.upsert_user(&user).unwrap();

        let loaded = users.find_user("U1").unwrap().unwrap();
        assert_eq!(loaded.name, "Ada L.");
        assert!(users.remove_user("U1").unwrap());
        assert!(!users.remove_user("U1").unwrap());
    }

    #[test]
    fn lesson_lookup_reports_missing_deck() {
        let conn = open_db_in_memory().unwrap();
        let lessons = SqliteLessonDirectory::new(&conn);
        lessons
            .upsert_lesson("L1", "Cells", Some("https://cdn.example/cells.pdf"))
            .unwrap();

        let lesson = lessons.find_lesson("L1").unwrap().unwrap();
        assert_eq!(lesson.title, "Cells");
        assert!(!lesson.has_deck);
        assert!(lessons.find_lesson("L2").unwrap().is_none());
    }
}
