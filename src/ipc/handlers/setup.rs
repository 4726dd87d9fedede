use crate::db;
use crate::gradebook::{
    CatalogEntry, ImportOptions, SubjectCatalog, DEFAULT_CONTINUOUS_SUFFIX, DEFAULT_EXAM_SUFFIX,
    DEFAULT_IDENTIFIER_COLUMN, DEFAULT_MAX_GRADE,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const CATALOG_KEY: &str = "setup.subjectCatalog";

#[derive(Clone, Copy)]
enum SetupSection {
    GradeImport,
    Bookings,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "gradeImport" => Some(Self::GradeImport),
            "bookings" => Some(Self::Bookings),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::GradeImport => "setup.gradeImport",
            Self::Bookings => "setup.bookings",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::GradeImport => json!({
            "maxGrade": DEFAULT_MAX_GRADE,
            "treatZeroAsAbsent": true,
            "identifierColumn": DEFAULT_IDENTIFIER_COLUMN,
            "continuousSuffix": DEFAULT_CONTINUOUS_SUFFIX,
            "examSuffix": DEFAULT_EXAM_SUFFIX,
            "publishOnImport": false
        }),
        SetupSection::Bookings => json!({
            "requireApproval": true
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::GradeImport => match k.as_str() {
                "maxGrade" => {
                    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", k))?;
                    if !(1.0..=1000.0).contains(&n) {
                        return Err(format!("{} must be in 1..=1000", k));
                    }
                    obj.insert(k.clone(), json!(n));
                }
                "treatZeroAsAbsent" | "publishOnImport" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "identifierColumn" | "continuousSuffix" | "examSuffix" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 64)?));
                }
                _ => return Err(format!("unknown gradeImport field: {}", k)),
            },
            SetupSection::Bookings => match k.as_str() {
                "requireApproval" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown bookings field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort: a malformed saved value must not block reads.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

#[derive(Debug, Clone)]
pub struct GradeImportSettings {
    pub options: ImportOptions,
    pub continuous_suffix: String,
    pub exam_suffix: String,
    pub publish_on_import: bool,
}

pub fn grade_import_settings(conn: &Connection) -> anyhow::Result<GradeImportSettings> {
    let v = load_section(conn, SetupSection::GradeImport)?;
    let str_or = |key: &str, default: &str| {
        v.get(key)
            .and_then(|x| x.as_str())
            .unwrap_or(default)
            .to_string()
    };
    Ok(GradeImportSettings {
        options: ImportOptions {
            max_grade: v
                .get("maxGrade")
                .and_then(|x| x.as_f64())
                .unwrap_or(DEFAULT_MAX_GRADE),
            treat_zero_as_absent: v
                .get("treatZeroAsAbsent")
                .and_then(|x| x.as_bool())
                .unwrap_or(true),
            identifier_column: str_or("identifierColumn", DEFAULT_IDENTIFIER_COLUMN),
        },
        continuous_suffix: str_or("continuousSuffix", DEFAULT_CONTINUOUS_SUFFIX),
        exam_suffix: str_or("examSuffix", DEFAULT_EXAM_SUFFIX),
        publish_on_import: v
            .get("publishOnImport")
            .and_then(|x| x.as_bool())
            .unwrap_or(false),
    })
}

pub fn bookings_require_approval(conn: &Connection) -> anyhow::Result<bool> {
    let v = load_section(conn, SetupSection::Bookings)?;
    Ok(v.get("requireApproval")
        .and_then(|x| x.as_bool())
        .unwrap_or(true))
}

fn saved_catalog_columns(conn: &Connection) -> anyhow::Result<Option<HashMap<String, CatalogEntry>>> {
    let Some(saved) = db::settings_get_json(conn, CATALOG_KEY)? else {
        return Ok(None);
    };
    let Some(columns) = saved.get("columns") else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(columns.clone())?))
}

/// The workspace catalog if one was saved, otherwise the built-in one,
/// with the configured kind suffixes.
pub fn load_catalog(conn: &Connection, settings: &GradeImportSettings) -> anyhow::Result<SubjectCatalog> {
    let catalog = match saved_catalog_columns(conn)? {
        Some(columns) => SubjectCatalog::new(columns),
        None => SubjectCatalog::default(),
    };
    Ok(catalog.with_suffixes(&settings.continuous_suffix, &settings.exam_suffix))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grade_import = match load_section(conn, SetupSection::GradeImport) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let bookings = match load_section(conn, SetupSection::Bookings) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "gradeImport": grade_import,
            "bookings": bookings
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

fn catalog_json(catalog: &SubjectCatalog) -> Value {
    let mut columns = catalog.columns().iter().collect::<Vec<_>>();
    columns.sort_by(|a, b| a.0.cmp(b.0));
    let columns = columns
        .into_iter()
        .map(|(name, entry)| (name.clone(), json!(entry)))
        .collect::<Map<String, Value>>();
    Value::Object(columns)
}

fn handle_catalog_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let saved = match saved_catalog_columns(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let source = if saved.is_some() { "workspace" } else { "default" };
    let catalog = match saved {
        Some(columns) => SubjectCatalog::new(columns),
        None => SubjectCatalog::default(),
    };
    ok(
        &req.id,
        json!({
            "source": source,
            "columns": catalog_json(&catalog)
        }),
    )
}

fn handle_catalog_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(columns_raw) = req.params.get("columns") else {
        return err(&req.id, "bad_params", "missing columns", None);
    };
    if columns_raw.is_null() {
        if let Err(e) = conn.execute("DELETE FROM settings WHERE key = ?", [CATALOG_KEY]) {
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
        tracing::info!("subject catalog reset to default");
        return ok(&req.id, json!({ "ok": true, "source": "default" }));
    }
    let columns: HashMap<String, CatalogEntry> = match serde_json::from_value(columns_raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("invalid columns: {e}"), None),
    };
    for (name, entry) in &columns {
        if name.trim().is_empty()
            || entry.subject_code.trim().is_empty()
            || entry.subject_name.trim().is_empty()
        {
            return err(
                &req.id,
                "bad_params",
                "catalog columns need a name, subjectCode and subjectName",
                Some(json!({ "column": name })),
            );
        }
    }
    if let Err(e) = db::settings_set_json(conn, CATALOG_KEY, &json!({ "columns": columns })) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(columns = columns.len(), "subject catalog updated");
    ok(
        &req.id,
        json!({ "ok": true, "source": "workspace", "columnCount": columns.len() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        "catalog.get" => Some(handle_catalog_get(state, req)),
        "catalog.update" => Some(handle_catalog_update(state, req)),
        _ => None,
    }
}
