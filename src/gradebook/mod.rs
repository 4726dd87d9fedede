//! Grade import pipeline: parse, map, validate, import.
//!
//! Callers run the stages in that order. `import_grades` takes the
//! validation report and refuses to write when it is not valid.

mod import;
mod mapping;
mod parse;
mod validate;

pub use import::{import_grades, ImportTarget};
pub use mapping::{
    CatalogEntry, ColumnMapping, EvaluationKind, SubjectCatalog, DEFAULT_CONTINUOUS_SUFFIX,
    DEFAULT_EXAM_SUFFIX,
};
pub use parse::{parse_grade_csv, CellValue, ParsedSheet, Row, DEFAULT_IDENTIFIER_COLUMN};
pub use validate::{validate, ValidationReport};

use serde::Serialize;

pub const DEFAULT_MAX_GRADE: f64 = 20.0;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub max_grade: f64,
    /// A grade of exactly zero cannot be told apart from "not provided" in
    /// source sheets; when set, zero is skipped like an empty cell.
    pub treat_zero_as_absent: bool,
    pub identifier_column: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_grade: DEFAULT_MAX_GRADE,
            treat_zero_as_absent: true,
            identifier_column: DEFAULT_IDENTIFIER_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_no: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Issue {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            line: None,
            student_no: None,
            column: None,
        }
    }

    pub fn at_row(mut self, row: &Row) -> Self {
        self.line = Some(row.line_no);
        self.student_no = Some(row.student_no.clone());
        self
    }

    pub fn at_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GradeCell {
    Absent,
    Grade(f64),
    NotANumber(String),
    OutOfRange(f64),
}

/// Classifies one cell. The validator and the importer both go through
/// this so they never disagree about which cells are imported.
pub(crate) fn grade_cell(value: Option<&CellValue>, options: &ImportOptions) -> GradeCell {
    let n = match value {
        None => return GradeCell::Absent,
        Some(CellValue::Number(n)) => *n,
        Some(CellValue::Text(s)) => {
            let t = s.trim();
            if t.is_empty() {
                return GradeCell::Absent;
            }
            match t.parse::<f64>() {
                Ok(n) if n.is_finite() => n,
                _ => return GradeCell::NotANumber(t.to_string()),
            }
        }
    };
    if n == 0.0 && options.treat_zero_as_absent {
        return GradeCell::Absent;
    }
    if !(0.0..=options.max_grade).contains(&n) {
        return GradeCell::OutOfRange(n);
    }
    GradeCell::Grade(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(v: CellValue) -> GradeCell {
        grade_cell(Some(&v), &ImportOptions::default())
    }

    #[test]
    fn range_boundaries() {
        assert_eq!(classify(CellValue::Number(0.0)), GradeCell::Absent);
        assert_eq!(classify(CellValue::Number(20.0)), GradeCell::Grade(20.0));
        assert_eq!(classify(CellValue::coerce("20.0")), GradeCell::Grade(20.0));
        assert_eq!(classify(CellValue::Number(20.1)), GradeCell::OutOfRange(20.1));
        assert_eq!(classify(CellValue::Number(-1.0)), GradeCell::OutOfRange(-1.0));
        assert_eq!(
            classify(CellValue::Text("abc".into())),
            GradeCell::NotANumber("abc".into())
        );
        assert_eq!(classify(CellValue::Text("  ".into())), GradeCell::Absent);
        assert_eq!(grade_cell(None, &ImportOptions::default()), GradeCell::Absent);
    }

    #[test]
    fn zero_is_a_grade_when_configured() {
        let options = ImportOptions {
            treat_zero_as_absent: false,
            ..ImportOptions::default()
        };
        assert_eq!(
            grade_cell(Some(&CellValue::Number(0.0)), &options),
            GradeCell::Grade(0.0)
        );
    }
}
