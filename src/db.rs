use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "campus.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL UNIQUE,
            start_date TEXT,
            end_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_kinds(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;
    seed_evaluation_kinds(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            evaluation_kind_id TEXT NOT NULL,
            grade REAL NOT NULL,
            max_grade REAL NOT NULL,
            semester INTEGER NOT NULL,
            academic_year_id TEXT NOT NULL,
            evaluation_date TEXT NOT NULL,
            is_published INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(evaluation_kind_id) REFERENCES evaluation_kinds(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            UNIQUE(student_id, subject_id, evaluation_kind_id, semester, academic_year_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_year_semester ON grades(academic_year_id, semester)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_import_runs(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            written INTEGER NOT NULL,
            error_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_import_runs_checksum
         ON grade_import_runs(academic_year_id, semester, checksum)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS resources(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL DEFAULT 'room'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reservations(
            id TEXT PRIMARY KEY,
            resource_id TEXT NOT NULL,
            title TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            status TEXT NOT NULL,
            requested_by TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(resource_id) REFERENCES resources(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reservations_resource ON reservations(resource_id)",
        [],
    )?;

    Ok(())
}

fn seed_evaluation_kinds(conn: &Connection) -> anyhow::Result<()> {
    for (code, name) in [("CC", "Contrôle continu"), ("EF", "Examen final")] {
        conn.execute(
            "INSERT OR IGNORE INTO evaluation_kinds(id, code, name) VALUES(?, ?, ?)",
            (uuid::Uuid::new_v4().to_string(), code, name),
        )?;
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
