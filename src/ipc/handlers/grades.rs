use crate::gradebook::{
    import_grades, parse_grade_csv, validate, ColumnMapping, ImportTarget, ParsedSheet,
    ValidationReport,
};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{grade_import_settings, load_catalog, GradeImportSettings};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::repo::SqliteRepository;
use chrono::{Local, NaiveDate, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

struct PreparedSheet {
    settings: GradeImportSettings,
    sheet: ParsedSheet,
    mappings: Vec<ColumnMapping>,
    ignored_columns: Vec<String>,
    report: ValidationReport,
}

fn prepare_sheet(conn: &Connection, text: &str) -> Result<PreparedSheet, HandlerErr> {
    let settings =
        grade_import_settings(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let catalog =
        load_catalog(conn, &settings).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let id_col = settings.options.identifier_column.clone();

    let sheet = parse_grade_csv(text, &id_col);
    let mappings = catalog.map_columns(&sheet.headers, &id_col);
    let ignored_columns = sheet
        .headers
        .iter()
        .filter(|h| !h.eq_ignore_ascii_case(&id_col))
        .filter(|h| !mappings.iter().any(|m| &m.column == *h))
        .cloned()
        .collect::<Vec<_>>();

    let repo = SqliteRepository::new(conn);
    let report = validate(&repo, &sheet.rows, &mappings, &settings.options)?;

    Ok(PreparedSheet {
        settings,
        sheet,
        mappings,
        ignored_columns,
        report,
    })
}

fn sheet_checksum(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn handle_import_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let text = get_required_str(params, "text")?;
    let prepared = prepare_sheet(conn, &text)?;
    Ok(json!({
        "report": prepared.report,
        "mappings": prepared.mappings,
        "ignoredColumns": prepared.ignored_columns,
        "rowCount": prepared.sheet.rows.len(),
        "checksum": sheet_checksum(&text),
    }))
}

fn parse_semester(params: &Value) -> Result<i64, HandlerErr> {
    match params.get("semester").and_then(|v| v.as_i64()) {
        Some(v) if (1..=12).contains(&v) => Ok(v),
        _ => Err(HandlerErr::bad_params("semester must be an integer in 1..=12")),
    }
}

fn parse_evaluation_date(params: &Value) -> Result<NaiveDate, HandlerErr> {
    match get_optional_str(params, "evaluationDate") {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("evaluationDate must be YYYY-MM-DD")),
        None => Ok(Local::now().date_naive()),
    }
}

fn require_academic_year(conn: &Connection, id: &str) -> Result<(), HandlerErr> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM academic_years WHERE id = ?", [id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "academic year not found".to_string(),
            details: Some(json!({ "academicYearId": id })),
        });
    }
    Ok(())
}

fn previous_import_at(
    conn: &Connection,
    target: &ImportTarget,
    checksum: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT created_at FROM grade_import_runs
         WHERE academic_year_id = ? AND semester = ? AND checksum = ? AND written > 0
         ORDER BY created_at DESC
         LIMIT 1",
        (&target.academic_year_id, target.semester, checksum),
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn record_import_run(
    conn: &Connection,
    target: &ImportTarget,
    checksum: &str,
    row_count: usize,
    written: usize,
    error_count: usize,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO grade_import_runs(
            id, academic_year_id, semester, checksum, row_count, written, error_count, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &target.academic_year_id,
            target.semester,
            checksum,
            row_count as i64,
            written as i64,
            error_count as i64,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn handle_import_apply(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let text = get_required_str(params, "text")?;
    let academic_year_id = get_required_str(params, "academicYearId")?;
    let semester = parse_semester(params)?;
    let evaluation_date = parse_evaluation_date(params)?;
    require_academic_year(conn, &academic_year_id)?;

    let prepared = prepare_sheet(conn, &text)?;
    let target = ImportTarget {
        academic_year_id,
        semester,
        evaluation_date,
        publish: params
            .get("publish")
            .and_then(|v| v.as_bool())
            .unwrap_or(prepared.settings.publish_on_import),
    };

    let checksum = sheet_checksum(&text);
    let previously_imported_at = previous_import_at(conn, &target, &checksum)?;

    let repo = SqliteRepository::new(conn);
    let outcome = import_grades(
        &repo,
        &prepared.report,
        &prepared.sheet.rows,
        &prepared.mappings,
        &target,
        &prepared.settings.options,
    )
    .map_err(|e| {
        tracing::error!(error = %e, "grade batch write failed");
        HandlerErr::db("db_insert_failed", e)
    })?;

    // Grades are already committed here; a failed run record must not hide that.
    let run_recorded = if outcome.aborted {
        tracing::warn!(
            errors = prepared.report.errors.len(),
            "grade import refused"
        );
        false
    } else {
        match record_import_run(
            conn,
            &target,
            &checksum,
            prepared.sheet.rows.len(),
            outcome.written,
            outcome.errors.len(),
        ) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, written = outcome.written, "import run not recorded");
                false
            }
        }
    };

    Ok(json!({
        "report": prepared.report,
        "written": outcome.written,
        "errors": outcome.errors,
        "aborted": outcome.aborted,
        "checksum": checksum,
        "previouslyImportedAt": previously_imported_at,
        "runRecorded": run_recorded,
    }))
}

fn handle_grades_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let academic_year_id = get_required_str(params, "academicYearId")?;
    let mut sql = String::from(
        "SELECT s.student_no, sub.code, sub.name, k.code, g.grade, g.max_grade,
                g.semester, g.evaluation_date, g.is_published
         FROM grades g
         JOIN students s ON s.id = g.student_id
         JOIN subjects sub ON sub.id = g.subject_id
         JOIN evaluation_kinds k ON k.id = g.evaluation_kind_id
         WHERE g.academic_year_id = ?",
    );
    let mut binds: Vec<SqlValue> = vec![SqlValue::Text(academic_year_id)];
    if let Some(sem) = params.get("semester").and_then(|v| v.as_i64()) {
        sql.push_str(" AND g.semester = ?");
        binds.push(SqlValue::Integer(sem));
    }
    if let Some(no) = get_optional_str(params, "studentNo") {
        sql.push_str(" AND s.student_no = ?");
        binds.push(SqlValue::Text(no));
    }
    sql.push_str(" ORDER BY s.student_no, sub.code, k.code, g.semester");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let grades = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(json!({
                "studentNo": r.get::<_, String>(0)?,
                "subjectCode": r.get::<_, String>(1)?,
                "subjectName": r.get::<_, String>(2)?,
                "kind": r.get::<_, String>(3)?,
                "grade": r.get::<_, f64>(4)?,
                "maxGrade": r.get::<_, f64>(5)?,
                "semester": r.get::<_, i64>(6)?,
                "evaluationDate": r.get::<_, String>(7)?,
                "published": r.get::<_, i64>(8)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "grades": grades }))
}

fn handle_import_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let year = get_optional_str(params, "academicYearId");
    let mut stmt = conn
        .prepare(
            "SELECT id, academic_year_id, semester, checksum, row_count, written, error_count, created_at
             FROM grade_import_runs
             WHERE (?1 IS NULL OR academic_year_id = ?1)
             ORDER BY created_at DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let runs = stmt
        .query_map([&year], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "academicYearId": r.get::<_, String>(1)?,
                "semester": r.get::<_, i64>(2)?,
                "checksum": r.get::<_, String>(3)?,
                "rowCount": r.get::<_, i64>(4)?,
                "written": r.get::<_, i64>(5)?,
                "errorCount": r.get::<_, i64>(6)?,
                "createdAt": r.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "runs": runs }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "grades.import.preview" => handle_import_preview,
        "grades.import.apply" => handle_import_apply,
        "grades.import.history" => handle_import_history,
        "grades.list" => handle_grades_list,
        _ => return None,
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match run(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seeded_db() -> (Connection, String) {
        let conn = Connection::open_in_memory().expect("open memory db");
        db::init_schema(&conn).expect("init schema");
        conn.execute(
            "INSERT INTO academic_years(id, label) VALUES('y1', '2025-2026')",
            [],
        )
        .expect("insert year");
        conn.execute(
            "INSERT INTO students(id, student_no, last_name, first_name) VALUES('s1', 'E1', 'Doe', 'Sam')",
            [],
        )
        .expect("insert student");
        conn.execute(
            "INSERT INTO subjects(id, code, name) VALUES('sub1', 'droit', 'Droit')",
            [],
        )
        .expect("insert subject");
        (conn, "y1".to_string())
    }

    fn apply(conn: &Connection, year: &str) -> Value {
        let params = json!({
            "text": "matricule,Droit_CC\nE1,14\n",
            "academicYearId": year,
            "semester": 1,
            "evaluationDate": "2026-01-10"
        });
        match handle_import_apply(conn, &params) {
            Ok(v) => v,
            Err(e) => panic!("apply failed: {} {}", e.code, e.message),
        }
    }

    #[test]
    fn apply_records_the_run() {
        let (conn, year) = seeded_db();
        let result = apply(&conn, &year);
        assert_eq!(result["written"], json!(1));
        assert_eq!(result["runRecorded"], json!(true));
        let runs: i64 = conn
            .query_row("SELECT COUNT(*) FROM grade_import_runs", [], |r| r.get(0))
            .expect("count runs");
        assert_eq!(runs, 1);
    }

    #[test]
    fn failed_run_record_still_reports_written_grades() {
        let (conn, year) = seeded_db();
        conn.execute_batch(
            "CREATE TRIGGER refuse_runs BEFORE INSERT ON grade_import_runs
             BEGIN SELECT RAISE(ABORT, 'runs table is read-only'); END;",
        )
        .expect("create trigger");

        let result = apply(&conn, &year);
        assert_eq!(result["aborted"], json!(false));
        assert_eq!(result["written"], json!(1));
        assert_eq!(result["runRecorded"], json!(false));

        let grades: i64 = conn
            .query_row("SELECT COUNT(*) FROM grades", [], |r| r.get(0))
            .expect("count grades");
        assert_eq!(grades, 1);
    }
}
