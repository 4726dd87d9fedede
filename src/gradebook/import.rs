use super::{grade_cell, ColumnMapping, EvaluationKind, GradeCell, ImportOptions, Issue, Row};
use super::ValidationReport;
use crate::repo::{EntityKind, GradeFact, RecordRepository, RepoError};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ImportTarget {
    pub academic_year_id: String,
    pub semester: i64,
    pub evaluation_date: NaiveDate,
    pub publish: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub written: usize,
    pub errors: Vec<Issue>,
    /// Set when nothing was attempted because a precondition failed.
    pub aborted: bool,
}

impl ImportOutcome {
    fn abort(issue: Issue) -> Self {
        Self {
            written: 0,
            errors: vec![issue],
            aborted: true,
        }
    }
}

fn distinct<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.filter(|k| seen.insert(*k))
        .map(|k| k.to_string())
        .collect()
}

fn resolve<R: RecordRepository + ?Sized>(
    repo: &R,
    entity: EntityKind,
    keys: &[String],
) -> Result<HashMap<String, String>, RepoError> {
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(repo
        .find_by_natural_keys(entity, keys)?
        .into_iter()
        .map(|k| (k.natural_key, k.id))
        .collect())
}

/// Writes the grades of a validated sheet as one batch upsert.
///
/// Unresolvable students or subjects are reported per row and skipped;
/// everything else is written. Returns an aborted outcome without touching
/// the store when `report` is not valid or the evaluation kinds are missing.
pub fn import_grades<R: RecordRepository + ?Sized>(
    repo: &R,
    report: &ValidationReport,
    rows: &[Row],
    mappings: &[ColumnMapping],
    target: &ImportTarget,
    options: &ImportOptions,
) -> Result<ImportOutcome, RepoError> {
    if !report.valid {
        return Ok(ImportOutcome::abort(Issue::new(
            "validation_failed",
            format!(
                "sheet has {} blocking error(s); fix them before importing",
                report.errors.len()
            ),
        )));
    }

    let kind_codes = vec![
        EvaluationKind::ContinuousAssessment.code().to_string(),
        EvaluationKind::FinalExam.code().to_string(),
    ];
    let kinds = resolve(repo, EntityKind::EvaluationKind, &kind_codes)?;
    let (Some(cc_id), Some(ef_id)) = (
        kinds.get(EvaluationKind::ContinuousAssessment.code()),
        kinds.get(EvaluationKind::FinalExam.code()),
    ) else {
        tracing::error!("evaluation kinds CC/EF are not configured; import aborted");
        return Ok(ImportOutcome::abort(Issue::new(
            "missing_evaluation_kinds",
            "evaluation kinds CC and EF must exist before importing grades",
        )));
    };

    let students = resolve(
        repo,
        EntityKind::Student,
        &distinct(rows.iter().map(|r| r.student_no.as_str())),
    )?;
    let subjects = resolve(
        repo,
        EntityKind::Subject,
        &distinct(mappings.iter().map(|m| m.subject_code.as_str())),
    )?;

    let mut outcome = ImportOutcome::default();
    let mut facts: Vec<GradeFact> = Vec::new();
    let mut fact_index: HashMap<(String, String, String), usize> = HashMap::new();

    for row in rows {
        let usable = mappings
            .iter()
            .filter_map(|m| match grade_cell(row.values.get(&m.column), options) {
                GradeCell::Grade(v) => Some((m, v)),
                GradeCell::Absent => None,
                GradeCell::NotANumber(_) | GradeCell::OutOfRange(_) => {
                    outcome.errors.push(
                        Issue::new("invalid_grade", "grade rejected at import time")
                            .at_row(row)
                            .at_column(&m.column),
                    );
                    None
                }
            })
            .collect::<Vec<_>>();
        if usable.is_empty() {
            continue;
        }

        let Some(student_id) = students.get(&row.student_no) else {
            outcome.errors.push(
                Issue::new(
                    "student_unresolved",
                    format!("student {} not found; row skipped", row.student_no),
                )
                .at_row(row),
            );
            continue;
        };

        for (m, grade) in usable {
            let Some(subject_id) = subjects.get(&m.subject_code) else {
                outcome.errors.push(
                    Issue::new(
                        "subject_unresolved",
                        format!("subject {} not found", m.subject_code),
                    )
                    .at_row(row)
                    .at_column(&m.column),
                );
                continue;
            };
            let kind_id = match m.kind {
                EvaluationKind::ContinuousAssessment => cc_id,
                EvaluationKind::FinalExam => ef_id,
            };
            let fact = GradeFact {
                student_id: student_id.clone(),
                subject_id: subject_id.clone(),
                evaluation_kind_id: kind_id.clone(),
                grade,
                max_grade: options.max_grade,
                semester: target.semester,
                academic_year_id: target.academic_year_id.clone(),
                evaluation_date: target.evaluation_date,
                published: target.publish,
            };
            // Two columns can map to the same subject and kind; the later one wins.
            let key = (student_id.clone(), subject_id.clone(), kind_id.clone());
            match fact_index.get(&key) {
                Some(&i) => facts[i] = fact,
                None => {
                    fact_index.insert(key, facts.len());
                    facts.push(fact);
                }
            }
        }
    }

    outcome.written = repo.upsert_grades(&facts)?;
    tracing::info!(
        academic_year_id = %target.academic_year_id,
        semester = target.semester,
        written = outcome.written,
        errors = outcome.errors.len(),
        "grade batch imported"
    );
    Ok(outcome)
}
