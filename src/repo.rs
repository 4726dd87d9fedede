use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use uuid::Uuid;

/// Keeps `IN (...)` lookups well under SQLite's bound-parameter limit.
const LOOKUP_CHUNK: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Raised by the in-memory test double.
    #[cfg(test)]
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Entities that can be resolved from a natural key to an internal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Student,
    Subject,
    EvaluationKind,
}

impl EntityKind {
    /// Table, natural-key column and extra row filter. Inactive students
    /// are not import targets, so they never resolve.
    fn lookup_source(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Student => ("students", "student_no", " AND active = 1"),
            Self::Subject => ("subjects", "code", ""),
            Self::EvaluationKind => ("evaluation_kinds", "code", ""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedId {
    pub id: String,
    pub natural_key: String,
}

/// One normalized grade as written to the store.
///
/// `(student_id, subject_id, evaluation_kind_id, semester, academic_year_id)`
/// is the natural key; writing a fact with an existing key replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeFact {
    pub student_id: String,
    pub subject_id: String,
    pub evaluation_kind_id: String,
    pub grade: f64,
    pub max_grade: f64,
    pub semester: i64,
    pub academic_year_id: String,
    pub evaluation_date: NaiveDate,
    pub published: bool,
}

pub trait RecordRepository {
    /// Returns the records whose natural key is in `keys`. Keys with no
    /// record are simply absent from the result.
    fn find_by_natural_keys(
        &self,
        entity: EntityKind,
        keys: &[String],
    ) -> Result<Vec<KeyedId>, RepoError>;

    /// Writes all facts atomically, inserting or replacing on the natural key.
    /// Returns the number of facts written.
    fn upsert_grades(&self, facts: &[GradeFact]) -> Result<usize, RepoError>;
}

pub struct SqliteRepository<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl RecordRepository for SqliteRepository<'_> {
    fn find_by_natural_keys(
        &self,
        entity: EntityKind,
        keys: &[String],
    ) -> Result<Vec<KeyedId>, RepoError> {
        let (table, key_col, filter) = entity.lookup_source();
        let mut out = Vec::new();
        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT id, {key_col} FROM {table} WHERE {key_col} IN ({placeholders}){filter}"
            );
            let bind_values = chunk
                .iter()
                .map(|k| Value::Text(k.clone()))
                .collect::<Vec<_>>();
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(bind_values), |r| {
                    Ok(KeyedId {
                        id: r.get(0)?,
                        natural_key: r.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            out.extend(rows);
        }
        Ok(out)
    }

    fn upsert_grades(&self, facts: &[GradeFact]) -> Result<usize, RepoError> {
        if facts.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO grades(
                    id, student_id, subject_id, evaluation_kind_id, grade, max_grade,
                    semester, academic_year_id, evaluation_date, is_published, updated_at
                 )
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(student_id, subject_id, evaluation_kind_id, semester, academic_year_id)
                 DO UPDATE SET
                   grade = excluded.grade,
                   max_grade = excluded.max_grade,
                   evaluation_date = excluded.evaluation_date,
                   is_published = excluded.is_published,
                   updated_at = excluded.updated_at",
            )?;
            for f in facts {
                stmt.execute((
                    Uuid::new_v4().to_string(),
                    &f.student_id,
                    &f.subject_id,
                    &f.evaluation_kind_id,
                    f.grade,
                    f.max_grade,
                    f.semester,
                    &f.academic_year_id,
                    f.evaluation_date.format("%Y-%m-%d").to_string(),
                    f.published as i64,
                    &now,
                ))?;
            }
        }
        tx.commit()?;
        Ok(facts.len())
    }
}
