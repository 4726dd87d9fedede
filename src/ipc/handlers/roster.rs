use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, insert_err, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn parse_optional_date(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, key) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

fn create_academic_year(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let label = get_required_str(params, "label")?;
    let start = parse_optional_date(params, "startDate")?;
    let end = parse_optional_date(params, "endDate")?;
    if let (Some(s), Some(e)) = (&start, &end) {
        if e <= s {
            return Err(HandlerErr::bad_params("endDate must be after startDate"));
        }
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_years(id, label, start_date, end_date) VALUES(?, ?, ?, ?)",
        (&id, &label, &start, &end),
    )
    .map_err(|e| insert_err("academic_years", e))?;
    Ok(json!({ "academicYearId": id }))
}

fn list_academic_years(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, label, start_date, end_date FROM academic_years ORDER BY label")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let years = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
                "startDate": r.get::<_, Option<String>>(2)?,
                "endDate": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "academicYears": years }))
}

fn create_student(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_no = get_required_str(params, "studentNo")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_optional_str(params, "firstName").unwrap_or_default();
    let active = params.get("active").and_then(|v| v.as_bool()).unwrap_or(true);
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, student_no, last_name, first_name, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_no,
            &last_name,
            &first_name,
            active as i64,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| insert_err("students", e))?;
    Ok(json!({ "studentId": id }))
}

fn list_students(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_no, last_name, first_name, active
             FROM students
             ORDER BY last_name, first_name, student_no",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentNo": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "firstName": r.get::<_, String>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "students": students }))
}

fn create_subject(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, code, name) VALUES(?, ?, ?)",
        (&id, &code, &name),
    )
    .map_err(|e| insert_err("subjects", e))?;
    Ok(json!({ "subjectId": id }))
}

fn list_subjects(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, code, name FROM subjects ORDER BY code")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "academicYears.create" => create_academic_year,
        "academicYears.list" => |c, _| list_academic_years(c),
        "students.create" => create_student,
        "students.list" => |c, _| list_students(c),
        "subjects.create" => create_subject,
        "subjects.list" => |c, _| list_subjects(c),
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
