use rusqlite::{Connection, Result};

/// Initialise school record tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_students_tables(conn)?;
    create_grades_table(conn)?;
    create_feedback_table(conn)?;
    create_violations_table(conn)?;
    create_notifications_table(conn)?;
    Ok(())
}

/// Students plus the parent ↔ student relationship that scopes every lookup.
fn create_students_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS students (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            class_name  TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS parent_students (
            parent_id   TEXT NOT NULL,
            student_id  TEXT NOT NULL REFERENCES students(id),
            PRIMARY KEY (parent_id, student_id)
        );",
    )
}

fn create_grades_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS grades (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id   TEXT NOT NULL REFERENCES students(id),
            subject      TEXT NOT NULL,
            score        REAL NOT NULL,
            kind         TEXT NOT NULL,
            semester     TEXT NOT NULL,
            recorded_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_grades_student
            ON grades(student_id, subject);",
    )
}

fn create_feedback_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS feedback (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id    TEXT NOT NULL REFERENCES students(id),
            subject       TEXT,
            teacher_name  TEXT NOT NULL,
            content       TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_feedback_student
            ON feedback(student_id, created_at DESC);",
    )
}

fn create_violations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS violations (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id   TEXT NOT NULL REFERENCES students(id),
            kind         TEXT NOT NULL,
            description  TEXT NOT NULL,
            points       INTEGER NOT NULL DEFAULT 0,
            occurred_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_violations_student
            ON violations(student_id, occurred_at DESC);",
    )
}

fn create_notifications_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS notifications (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id  TEXT NOT NULL,
            title         TEXT NOT NULL,
            body          TEXT NOT NULL,
            is_read       INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(recipient_id, created_at DESC);",
    )
}

// ── write helpers (fixtures / demo seed) ─────────────────────────────────────

pub fn insert_student(conn: &Connection, id: &str, name: &str, class_name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO students (id, name, class_name) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, name, class_name],
    )?;
    Ok(())
}

pub fn link_parent(conn: &Connection, parent_id: &str, student_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO parent_students (parent_id, student_id) VALUES (?1, ?2)",
        rusqlite::params![parent_id, student_id],
    )?;
    Ok(())
}

pub fn insert_grade(
    conn: &Connection,
    student_id: &str,
    subject: &str,
    score: f64,
    kind: &str,
    semester: &str,
    recorded_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO grades (student_id, subject, score, kind, semester, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![student_id, subject, score, kind, semester, recorded_at],
    )?;
    Ok(())
}

pub fn insert_feedback(
    conn: &Connection,
    student_id: &str,
    subject: Option<&str>,
    teacher_name: &str,
    content: &str,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO feedback (student_id, subject, teacher_name, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![student_id, subject, teacher_name, content, created_at],
    )?;
    Ok(())
}

pub fn insert_violation(
    conn: &Connection,
    student_id: &str,
    kind: &str,
    description: &str,
    points: i64,
    occurred_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO violations (student_id, kind, description, points, occurred_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![student_id, kind, description, points, occurred_at],
    )?;
    Ok(())
}

pub fn insert_notification(
    conn: &Connection,
    recipient_id: &str,
    title: &str,
    body: &str,
    is_read: bool,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications (recipient_id, title, body, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![recipient_id, title, body, is_read, created_at],
    )?;
    Ok(())
}

/// Small demo data set: one parent (`parent-demo`) with two children.
pub fn seed_demo(conn: &Connection) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    insert_student(conn, "stu-minh", "Nguyễn Văn Minh", "7A1")?;
    insert_student(conn, "stu-lan", "Nguyễn Thị Lan", "4B")?;
    link_parent(conn, "parent-demo", "stu-minh")?;
    link_parent(conn, "parent-demo", "stu-lan")?;

    for (subject, score, kind) in [
        ("Toán", 8.5, "midterm"),
        ("Toán", 9.0, "15min"),
        ("Ngữ văn", 7.0, "midterm"),
        ("Tiếng Anh", 8.0, "oral"),
    ] {
        insert_grade(conn, "stu-minh", subject, score, kind, "HK1", &now)?;
    }
    insert_grade(conn, "stu-lan", "Toán", 10.0, "midterm", "HK1", &now)?;

    insert_feedback(
        conn,
        "stu-minh",
        Some("Toán"),
        "Cô Hạnh",
        "Minh tiến bộ rõ rệt trong phần hình học.",
        &now,
    )?;
    insert_violation(conn, "stu-minh", "late", "Đi học muộn 10 phút", 2, &now)?;
    insert_notification(
        conn,
        "parent-demo",
        "Họp phụ huynh",
        "Họp phụ huynh cuối kỳ vào thứ Bảy.",
        false,
        &now,
    )?;
    Ok(())
}
