use crate::ipc::error::err;
use crate::repo::RepoError;
use rusqlite::ErrorCode;
use serde_json::{json, Value};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<RepoError> for HandlerErr {
    fn from(e: RepoError) -> Self {
        tracing::error!(error = %e, "repository call failed");
        Self::db("db_query_failed", e)
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Unique-key violations surface as `conflict`; anything else is a plain insert failure.
pub fn insert_err(table: &str, e: rusqlite::Error) -> HandlerErr {
    let code = match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => "conflict",
        _ => "db_insert_failed",
    };
    HandlerErr {
        code,
        message: e.to_string(),
        details: Some(json!({ "table": table })),
    }
}
