use crate::ledger::{AttendanceStatus, AttendanceSummary, RosterEntry, SubmissionPayload};
use crate::progress::{EmptySessionPolicy, Material, Session, Subject, SubjectStatus, SubjectsState};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::Arc;

pub const DB_FILE: &str = "shine.sqlite3";
pub const SETTING_EMPTY_SESSION_POLICY: &str = "academy.emptySessionPolicy";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            last_status TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    // Workspaces created before attendance was tracked lack the status columns.
    ensure_students_last_status(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_submissions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            total INTEGER NOT NULL,
            present INTEGER NOT NULL,
            absent INTEGER NOT NULL,
            late INTEGER NOT NULL,
            excused INTEGER NOT NULL,
            payload_json TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_submissions_class ON attendance_submissions(class_id, submitted_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            bucket TEXT NOT NULL DEFAULT 'active',
            bucket_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS academy_sessions(
            subject_id TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(subject_id, id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS materials(
            subject_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(subject_id, session_id, id),
            FOREIGN KEY(subject_id, session_id) REFERENCES academy_sessions(subject_id, id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_last_status(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "last_status")? {
        conn.execute("ALTER TABLE students ADD COLUMN last_status TEXT", [])?;
    }
    if !table_has_column(conn, "students", "updated_at")? {
        conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| r.get(0))
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Falls back to the default when the setting is missing or unreadable.
pub fn empty_session_policy(conn: &Connection) -> EmptySessionPolicy {
    match settings_get_json(conn, SETTING_EMPTY_SESSION_POLICY) {
        Ok(Some(v)) => v
            .as_str()
            .and_then(EmptySessionPolicy::parse)
            .unwrap_or_default(),
        Ok(None) => EmptySessionPolicy::default(),
        Err(e) => {
            log::warn!("unreadable {}: {e:?}", SETTING_EMPTY_SESSION_POLICY);
            EmptySessionPolicy::default()
        }
    }
}

/// Where rosters come from. The IPC layer only sees this trait.
pub trait RosterSource {
    /// `None` when the class does not exist.
    fn roster(&self, class_id: &str) -> anyhow::Result<Option<Vec<RosterEntry>>>;
}

impl RosterSource for Connection {
    fn roster(&self, class_id: &str) -> anyhow::Result<Option<Vec<RosterEntry>>> {
        if !class_exists(self, class_id)? {
            return Ok(None);
        }
        let mut stmt = self.prepare(
            "SELECT id, display_name, last_status
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )?;
        let rows = stmt
            .query_map([class_id], |r| {
                let last: Option<String> = r.get(2)?;
                Ok(RosterEntry {
                    student_id: r.get(0)?,
                    display_name: r.get(1)?,
                    last_known_status: last.as_deref().and_then(AttendanceStatus::parse),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(rows))
    }
}

pub fn class_exists(conn: &Connection, class_id: &str) -> anyhow::Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub student_count: i64,
}

pub fn list_classes(conn: &Connection) -> anyhow::Result<Vec<ClassRow>> {
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ClassRow {
                id: row.get(0)?,
                name: row.get(1)?,
                student_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_class(conn: &Connection, id: &str, name: &str) -> anyhow::Result<()> {
    conn.execute("INSERT INTO classes(id, name) VALUES(?, ?)", (id, name))?;
    Ok(())
}

pub fn insert_student(
    conn: &Connection,
    class_id: &str,
    id: &str,
    display_name: &str,
    last_status: Option<AttendanceStatus>,
) -> anyhow::Result<()> {
    let next_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "INSERT INTO students(id, class_id, display_name, sort_order, last_status)
         VALUES(?, ?, ?, ?, ?)",
        (
            id,
            class_id,
            display_name,
            next_order,
            last_status.map(|s| s.as_str()),
        ),
    )?;
    Ok(())
}

/// Stores the payload and carries each roster member's status forward as
/// their last known status.
pub fn save_submission(
    conn: &Connection,
    submission_id: &str,
    submitted_at: &str,
    payload: &SubmissionPayload,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    let s = &payload.summary;
    tx.execute(
        "INSERT INTO attendance_submissions(
            id, class_id, submitted_at, total, present, absent, late, excused, payload_json
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            submission_id,
            payload.class_id,
            submitted_at,
            s.total as i64,
            s.present as i64,
            s.absent as i64,
            s.late as i64,
            s.excused as i64,
            serde_json::to_string(payload)?,
        ],
    )?;
    for student in &payload.students {
        tx.execute(
            "UPDATE students SET last_status = ?, updated_at = ? WHERE class_id = ? AND id = ?",
            (
                student.status.as_str(),
                submitted_at,
                &payload.class_id,
                &student.student_id,
            ),
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SubmissionRow {
    pub id: String,
    pub submitted_at: String,
    pub summary: AttendanceSummary,
}

pub fn list_submissions(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<SubmissionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, submitted_at, total, present, absent, late, excused
         FROM attendance_submissions
         WHERE class_id = ?
         ORDER BY submitted_at DESC, id",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(SubmissionRow {
                id: r.get(0)?,
                submitted_at: r.get(1)?,
                summary: AttendanceSummary {
                    total: r.get::<_, i64>(2)? as usize,
                    present: r.get::<_, i64>(3)? as usize,
                    absent: r.get::<_, i64>(4)? as usize,
                    late: r.get::<_, i64>(5)? as usize,
                    excused: r.get::<_, i64>(6)? as usize,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn parse_subject_status(raw: &str) -> SubjectStatus {
    if raw == SubjectStatus::Completed.as_str() {
        SubjectStatus::Completed
    } else {
        SubjectStatus::Active
    }
}

/// Loads both buckets in their stored order.
pub fn load_subjects(conn: &Connection) -> anyhow::Result<SubjectsState> {
    let mut subjects_stmt = conn.prepare(
        "SELECT id, title, progress, status, bucket
         FROM subjects
         ORDER BY bucket_order, id",
    )?;
    let heads = subjects_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut sessions_stmt = conn.prepare(
        "SELECT id, title, is_completed FROM academy_sessions WHERE subject_id = ? ORDER BY sort_order",
    )?;
    let mut materials_stmt = conn.prepare(
        "SELECT id, title, is_completed FROM materials
         WHERE subject_id = ? AND session_id = ?
         ORDER BY sort_order",
    )?;

    let mut state = SubjectsState::default();
    for (id, title, progress, status, bucket) in heads {
        let session_heads = sessions_stmt
            .query_map([&id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)? != 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut sessions = Vec::with_capacity(session_heads.len());
        for (session_id, session_title, is_completed) in session_heads {
            let materials = materials_stmt
                .query_map((&id, &session_id), |r| {
                    Ok(Material {
                        id: r.get(0)?,
                        title: r.get(1)?,
                        is_completed: r.get::<_, i64>(2)? != 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            sessions.push(Session {
                id: session_id,
                title: session_title,
                materials,
                is_completed,
            });
        }
        let subject = Arc::new(Subject {
            id,
            title,
            progress: progress.clamp(0, 100) as u8,
            sessions,
            status: parse_subject_status(&status),
        });
        match parse_subject_status(&bucket) {
            SubjectStatus::Active => state.active.push(subject),
            SubjectStatus::Completed => state.completed.push(subject),
        }
    }
    Ok(state)
}

fn write_subject_tree(tx: &Transaction, subject: &Subject) -> anyhow::Result<()> {
    tx.execute("DELETE FROM materials WHERE subject_id = ?", [&subject.id])?;
    tx.execute("DELETE FROM academy_sessions WHERE subject_id = ?", [&subject.id])?;
    for (si, session) in subject.sessions.iter().enumerate() {
        tx.execute(
            "INSERT INTO academy_sessions(subject_id, id, title, is_completed, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (
                &subject.id,
                &session.id,
                &session.title,
                session.is_completed as i64,
                si as i64,
            ),
        )?;
        for (mi, material) in session.materials.iter().enumerate() {
            tx.execute(
                "INSERT INTO materials(subject_id, session_id, id, title, is_completed, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &subject.id,
                    &session.id,
                    &material.id,
                    &material.title,
                    material.is_completed as i64,
                    mi as i64,
                ),
            )?;
        }
    }
    Ok(())
}

fn write_subject_head(
    tx: &Transaction,
    subject: &Subject,
    bucket: SubjectStatus,
    order: usize,
) -> anyhow::Result<()> {
    tx.execute(
        "INSERT INTO subjects(id, title, progress, status, bucket, bucket_order)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           progress = excluded.progress,
           status = excluded.status,
           bucket = excluded.bucket,
           bucket_order = excluded.bucket_order",
        (
            &subject.id,
            &subject.title,
            subject.progress as i64,
            subject.status.as_str(),
            bucket.as_str(),
            order as i64,
        ),
    )?;
    Ok(())
}

fn for_each_subject(
    state: &SubjectsState,
    mut f: impl FnMut(&Subject, SubjectStatus, usize) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    for bucket in [SubjectStatus::Active, SubjectStatus::Completed] {
        for (i, s) in state.bucket(bucket).iter().enumerate() {
            f(s.as_ref(), bucket, i)?;
        }
    }
    Ok(())
}

fn rewrite_subjects(tx: &Transaction, state: &SubjectsState) -> anyhow::Result<()> {
    tx.execute("DELETE FROM materials", [])?;
    tx.execute("DELETE FROM academy_sessions", [])?;
    tx.execute("DELETE FROM subjects", [])?;
    for_each_subject(state, |s, bucket, order| {
        write_subject_head(tx, s, bucket, order)?;
        write_subject_tree(tx, s)
    })
}

/// Replaces every stored subject with `state`.
pub fn replace_subjects(conn: &Connection, state: &SubjectsState) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    rewrite_subjects(&tx, state)?;
    tx.commit()?;
    Ok(())
}

/// Stores a new empty-session policy together with the subjects derived
/// under it. Either both land or neither does.
pub fn set_policy_and_replace_subjects(
    conn: &Connection,
    policy: EmptySessionPolicy,
    state: &SubjectsState,
) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    settings_set_json(&tx, SETTING_EMPTY_SESSION_POLICY, &serde_json::json!(policy.as_str()))?;
    rewrite_subjects(&tx, state)?;
    tx.commit()?;
    Ok(())
}

/// Rewrites one subject's tree and refreshes bucket placement of all
/// subjects, since a bucket move shifts the order of its neighbours.
pub fn save_subject(conn: &Connection, state: &SubjectsState, subject_id: &str) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    for_each_subject(state, |s, bucket, order| {
        write_subject_head(&tx, s, bucket, order)?;
        if s.id == subject_id {
            write_subject_tree(&tx, s)?;
        }
        Ok(())
    })?;
    tx.commit()?;
    Ok(())
}
