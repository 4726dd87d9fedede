use super::{grade_cell, ColumnMapping, GradeCell, ImportOptions, Issue, Row};
use crate::repo::{EntityKind, RecordRepository, RepoError};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub student_count: usize,
    pub subject_count: usize,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }
}

/// Checks parsed rows against the mappings and the store. Read-only:
/// the repository is only queried.
pub fn validate<R: RecordRepository + ?Sized>(
    repo: &R,
    rows: &[Row],
    mappings: &[ColumnMapping],
    options: &ImportOptions,
) -> Result<ValidationReport, RepoError> {
    let mut report = ValidationReport::default();

    if rows.is_empty() {
        report.errors.push(Issue::new("no_data", "no data found"));
        return Ok(report.finish());
    }

    report.student_count = rows.len();
    report.subject_count = mappings
        .iter()
        .map(|m| m.subject_code.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    if mappings.is_empty() {
        report.warnings.push(Issue::new(
            "no_subject_columns",
            "no recognized subject columns; nothing will be imported",
        ));
    }

    // Duplicates, listed in first-appearance order.
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut duplicates: Vec<&str> = Vec::new();
    for row in rows {
        let n = seen.entry(row.student_no.as_str()).or_insert(0);
        *n += 1;
        if *n == 2 {
            duplicates.push(row.student_no.as_str());
        }
    }
    if !duplicates.is_empty() {
        report.errors.push(Issue::new(
            "duplicate_student",
            format!("duplicate student numbers: {}", duplicates.join(", ")),
        ));
    }

    let mut distinct: Vec<String> = Vec::new();
    let mut distinct_seen: HashSet<&str> = HashSet::new();
    for row in rows {
        if distinct_seen.insert(row.student_no.as_str()) {
            distinct.push(row.student_no.clone());
        }
    }
    let known: HashSet<String> = repo
        .find_by_natural_keys(EntityKind::Student, &distinct)?
        .into_iter()
        .map(|k| k.natural_key)
        .collect();
    for student_no in &distinct {
        if !known.contains(student_no) {
            report.warnings.push(Issue {
                student_no: Some(student_no.clone()),
                ..Issue::new(
                    "student_not_found",
                    format!("student {} not found", student_no),
                )
            });
        }
    }

    for row in rows {
        for m in mappings {
            match grade_cell(row.values.get(&m.column), options) {
                GradeCell::Absent | GradeCell::Grade(_) => {}
                GradeCell::NotANumber(raw) => report.errors.push(
                    Issue::new(
                        "not_a_number",
                        format!(
                            "line {}: student {}, {}: '{}' is not a number",
                            row.line_no, row.student_no, m.column, raw
                        ),
                    )
                    .at_row(row)
                    .at_column(&m.column),
                ),
                GradeCell::OutOfRange(v) => report.errors.push(
                    Issue::new(
                        "out_of_range",
                        format!(
                            "line {}: student {}, {}: {} is outside 0..={}",
                            row.line_no, row.student_no, m.column, v, options.max_grade
                        ),
                    )
                    .at_row(row)
                    .at_column(&m.column),
                ),
            }
        }
    }

    tracing::debug!(
        rows = rows.len(),
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "grade sheet validated"
    );
    Ok(report.finish())
}
