use crate::bookings::{conflict_pairs, conflicts_for, Reservation, ReservationStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::bookings_require_approval;
use crate::ipc::helpers::{get_optional_str, get_required_str, insert_err, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const MAX_RESERVATION_HOURS: i64 = 24 * 14;

fn parse_instant(params: &Value, key: &str) -> Result<DateTime<Utc>, HandlerErr> {
    let raw = get_required_str(params, key)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be an RFC 3339 timestamp", key)))
}

fn parse_stored_instant(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn reservation_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(Reservation, String, Option<String>)> {
    let starts: String = r.get(2)?;
    let ends: String = r.get(3)?;
    let status: String = r.get(4)?;
    Ok((
        Reservation {
            id: r.get(0)?,
            resource_id: r.get(1)?,
            starts_at: parse_stored_instant(&starts)?,
            ends_at: parse_stored_instant(&ends)?,
            status: ReservationStatus::parse(&status).unwrap_or(ReservationStatus::Pending),
        },
        r.get(5)?,
        r.get(6)?,
    ))
}

const RESERVATION_COLUMNS: &str = "id, resource_id, starts_at, ends_at, status, title, requested_by";

fn reservation_json(r: &Reservation, title: &str, requested_by: Option<&str>) -> Value {
    json!({
        "id": r.id,
        "resourceId": r.resource_id,
        "title": title,
        "startsAt": r.starts_at.to_rfc3339(),
        "endsAt": r.ends_at.to_rfc3339(),
        "status": r.status.as_str(),
        "requestedBy": requested_by,
    })
}

/// Reservations that still occupy `resource_id`.
fn load_pool(conn: &Connection, resource_id: &str) -> Result<Vec<Reservation>, HandlerErr> {
    let sql = format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations
         WHERE resource_id = ?
         ORDER BY starts_at"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([resource_id], reservation_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map(|rows| {
            rows.into_iter()
                .map(|(r, _, _)| r)
                .filter(|r| r.status.holds_resource())
                .collect::<Vec<_>>()
        })
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn load_reservation(conn: &Connection, id: &str) -> Result<(Reservation, String, Option<String>), HandlerErr> {
    let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = ?");
    conn.query_row(&sql, [id], reservation_from_row)
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "reservation not found".to_string(),
            details: Some(json!({ "reservationId": id })),
        })
}

fn require_resource(conn: &Connection, id: &str) -> Result<(), HandlerErr> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM resources WHERE id = ?", [id], |r| r.get(0))
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if found.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "resource not found".to_string(),
            details: Some(json!({ "resourceId": id })),
        });
    }
    Ok(())
}

fn ids(list: &[&Reservation]) -> Vec<String> {
    list.iter().map(|r| r.id.clone()).collect()
}

fn handle_resource_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let kind = get_optional_str(params, "kind").unwrap_or_else(|| "room".to_string());
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO resources(id, name, kind) VALUES(?, ?, ?)",
        (&id, &name, &kind),
    )
    .map_err(|e| insert_err("resources", e))?;
    Ok(json!({ "resourceId": id }))
}

fn handle_resource_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, kind FROM resources ORDER BY name")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let resources = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "resources": resources }))
}

fn handle_reservation_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let resource_id = get_required_str(params, "resourceId")?;
    let title = get_required_str(params, "title")?;
    let starts_at = parse_instant(params, "startsAt")?;
    let ends_at = parse_instant(params, "endsAt")?;
    let requested_by = get_optional_str(params, "requestedBy");
    if ends_at <= starts_at {
        return Err(HandlerErr::bad_params("endsAt must be after startsAt"));
    }
    if (ends_at - starts_at).num_hours() > MAX_RESERVATION_HOURS {
        return Err(HandlerErr {
            code: "bad_params",
            message: "reservation is too long".to_string(),
            details: Some(json!({ "maxHours": MAX_RESERVATION_HOURS })),
        });
    }
    require_resource(conn, &resource_id)?;

    let status = if bookings_require_approval(conn).map_err(|e| HandlerErr::db("db_query_failed", e))? {
        ReservationStatus::Pending
    } else {
        ReservationStatus::Approved
    };
    let reservation = Reservation {
        id: Uuid::new_v4().to_string(),
        resource_id,
        starts_at,
        ends_at,
        status,
    };

    let pool = load_pool(conn, &reservation.resource_id)?;
    let conflicts = conflicts_for(&reservation, &pool);
    if status == ReservationStatus::Approved
        && conflicts.iter().any(|c| c.status == ReservationStatus::Approved)
    {
        return Err(HandlerErr {
            code: "conflict",
            message: "slot overlaps an approved reservation".to_string(),
            details: Some(json!({ "conflictIds": ids(&conflicts) })),
        });
    }

    conn.execute(
        "INSERT INTO reservations(id, resource_id, title, starts_at, ends_at, status, requested_by, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &reservation.id,
            &reservation.resource_id,
            &title,
            reservation.starts_at.to_rfc3339(),
            reservation.ends_at.to_rfc3339(),
            reservation.status.as_str(),
            &requested_by,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| insert_err("reservations", e))?;

    tracing::info!(
        reservation_id = %reservation.id,
        resource_id = %reservation.resource_id,
        conflicts = conflicts.len(),
        "reservation created"
    );
    Ok(json!({
        "reservationId": reservation.id,
        "status": reservation.status.as_str(),
        "conflictIds": ids(&conflicts),
    }))
}

fn handle_reservation_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let resource_id = get_optional_str(params, "resourceId");
    let sql = format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations
         WHERE (?1 IS NULL OR resource_id = ?1)
         ORDER BY starts_at, id"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([&resource_id], reservation_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let reservations = rows
        .iter()
        .map(|(r, title, by)| reservation_json(r, title, by.as_deref()))
        .collect::<Vec<_>>();
    Ok(json!({ "reservations": reservations }))
}

fn handle_reservation_set_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "reservationId")?;
    let raw_status = get_required_str(params, "status")?;
    let Some(status) = ReservationStatus::parse(&raw_status) else {
        return Err(HandlerErr::bad_params(
            "status must be one of: pending, approved, rejected, cancelled",
        ));
    };
    let (reservation, _, _) = load_reservation(conn, &id)?;

    if status == ReservationStatus::Approved {
        let pool = load_pool(conn, &reservation.resource_id)?;
        let blocking = conflicts_for(&reservation, &pool)
            .into_iter()
            .filter(|c| c.status == ReservationStatus::Approved)
            .collect::<Vec<_>>();
        if !blocking.is_empty() {
            return Err(HandlerErr {
                code: "conflict",
                message: "reservation overlaps an approved reservation".to_string(),
                details: Some(json!({ "conflictIds": ids(&blocking) })),
            });
        }
    }

    conn.execute(
        "UPDATE reservations SET status = ? WHERE id = ?",
        (status.as_str(), &id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(reservation_id = %id, status = status.as_str(), "reservation status changed");
    Ok(json!({ "ok": true, "status": status.as_str() }))
}

fn handle_reservation_conflicts(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    if let Some(id) = get_optional_str(params, "reservationId") {
        let (reservation, _, _) = load_reservation(conn, &id)?;
        let pool = load_pool(conn, &reservation.resource_id)?;
        let conflicts = conflicts_for(&reservation, &pool);
        return Ok(json!({
            "reservationId": id,
            "conflictIds": ids(&conflicts),
        }));
    }

    let Some(resource_id) = get_optional_str(params, "resourceId") else {
        return Err(HandlerErr::bad_params("missing reservationId or resourceId"));
    };
    require_resource(conn, &resource_id)?;
    let pool = load_pool(conn, &resource_id)?;
    let pairs = conflict_pairs(&pool)
        .into_iter()
        .map(|(a, b)| json!([a.id, b.id]))
        .collect::<Vec<_>>();
    Ok(json!({ "resourceId": resource_id, "pairs": pairs }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let run: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "resources.create" => handle_resource_create,
        "resources.list" => handle_resource_list,
        "reservations.create" => handle_reservation_create,
        "reservations.list" => handle_reservation_list,
        "reservations.setStatus" => handle_reservation_set_status,
        "reservations.conflicts" => handle_reservation_conflicts,
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
