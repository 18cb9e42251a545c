use std::sync::Mutex;

use guardian_core::types::ActorId;
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::error::{RecordError, Result};
use crate::types::{Feedback, GradeRecord, Notification, Student, Violation};

/// Read-only queries behind the chat tools.
///
/// Every student-scoped query takes a student id that the caller has already
/// resolved through [`RecordStore::find_child`]; ownership is checked there.
pub trait RecordStore: Send + Sync {
    /// All students linked to `parent`, ordered by name.
    fn children_of(&self, parent: &ActorId) -> Result<Vec<Student>>;

    /// Resolve a student by id or case-insensitive name, but only among
    /// `parent`'s own children.
    fn find_child(&self, parent: &ActorId, name_or_id: &str) -> Result<Option<Student>>;

    fn grades(
        &self,
        student_id: &str,
        subject: Option<&str>,
        semester: Option<&str>,
    ) -> Result<Vec<GradeRecord>>;

    fn feedback(&self, student_id: &str, limit: usize) -> Result<Vec<Feedback>>;

    fn violations(&self, student_id: &str, limit: usize) -> Result<Vec<Violation>>;

    fn notifications(
        &self,
        recipient: &ActorId,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<Notification>>;
}

/// SQLite-backed record store. One connection behind a `Mutex`.
pub struct SqliteRecordStore {
    db: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| RecordError::Unavailable("record connection poisoned".to_string()))
    }
}

impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self), fields(parent = %parent))]
    fn children_of(&self, parent: &ActorId) -> Result<Vec<Student>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT s.id, s.name, s.class_name
             FROM students s
             JOIN parent_students ps ON ps.student_id = s.id
             WHERE ps.parent_id = ?1
             ORDER BY s.name",
        )?;
        let rows = stmt.query_map(rusqlite::params![parent.as_str()], row_to_student)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self), fields(parent = %parent))]
    fn find_child(&self, parent: &ActorId, name_or_id: &str) -> Result<Option<Student>> {
        let needle = name_or_id.trim();
        // SQLite's LOWER() only folds ASCII, so compare Unicode-lowercased
        // names in Rust over the (small) set of the parent's children.
        let children = self.children_of(parent)?;
        let lowered = needle.to_lowercase();
        let found = children
            .into_iter()
            .find(|s| s.id == needle || s.name.to_lowercase() == lowered);
        debug!(found = found.is_some(), "child lookup");
        Ok(found)
    }

    fn grades(
        &self,
        student_id: &str,
        subject: Option<&str>,
        semester: Option<&str>,
    ) -> Result<Vec<GradeRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT subject, score, kind, semester, recorded_at
             FROM grades
             WHERE student_id = ?1
               AND (?2 IS NULL OR subject = ?2)
               AND (?3 IS NULL OR semester = ?3)
             ORDER BY subject, recorded_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![student_id, subject, semester], |row| {
            Ok(GradeRecord {
                subject: row.get(0)?,
                score: row.get(1)?,
                kind: row.get(2)?,
                semester: row.get(3)?,
                recorded_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn feedback(&self, student_id: &str, limit: usize) -> Result<Vec<Feedback>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT subject, teacher_name, content, created_at
             FROM feedback
             WHERE student_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![student_id, limit as i64], |row| {
            Ok(Feedback {
                subject: row.get(0)?,
                teacher_name: row.get(1)?,
                content: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn violations(&self, student_id: &str, limit: usize) -> Result<Vec<Violation>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT kind, description, points, occurred_at
             FROM violations
             WHERE student_id = ?1
             ORDER BY occurred_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![student_id, limit as i64], |row| {
            Ok(Violation {
                kind: row.get(0)?,
                description: row.get(1)?,
                points: row.get(2)?,
                occurred_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn notifications(
        &self,
        recipient: &ActorId,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, title, body, is_read, created_at
             FROM notifications
             WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![recipient.as_str(), unread_only, limit as i64],
            |row| {
                Ok(Notification {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    body: row.get(2)?,
                    is_read: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_student(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        class_name: row.get(2)?,
    })
}

/// Count of students in the table, for the gateway's startup log.
pub fn student_count(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn store() -> SqliteRecordStore {
        let conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        db::seed_demo(&conn).unwrap();
        db::insert_student(&conn, "stu-other", "Trần Văn Bình", "7A2").unwrap();
        db::link_parent(&conn, "parent-other", "stu-other").unwrap();
        SqliteRecordStore::new(conn)
    }

    #[test]
    fn children_are_scoped_to_parent() {
        let s = store();
        let kids = s.children_of(&ActorId::from("parent-demo")).unwrap();
        assert_eq!(kids.len(), 2);
        assert!(kids.iter().all(|k| k.id != "stu-other"));
    }

    #[test]
    fn find_child_is_case_insensitive_and_scoped() {
        let s = store();
        let parent = ActorId::from("parent-demo");
        let minh = s.find_child(&parent, "nguyễn văn minh").unwrap();
        assert_eq!(minh.map(|m| m.id), Some("stu-minh".to_string()));
        assert!(s.find_child(&parent, "stu-lan").unwrap().is_some());
        // Another parent's child is invisible.
        assert!(s.find_child(&parent, "Trần Văn Bình").unwrap().is_none());
    }

    #[test]
    fn grade_filters_apply() {
        let s = store();
        assert_eq!(s.grades("stu-minh", None, None).unwrap().len(), 4);
        assert_eq!(s.grades("stu-minh", Some("Toán"), None).unwrap().len(), 2);
        assert!(s.grades("stu-minh", None, Some("HK2")).unwrap().is_empty());
    }

    #[test]
    fn notifications_unread_filter() {
        let s = store();
        let parent = ActorId::from("parent-demo");
        assert_eq!(s.notifications(&parent, true, 10).unwrap().len(), 1);
        assert!(s
            .notifications(&ActorId::from("parent-other"), false, 10)
            .unwrap()
            .is_empty());
    }
}
