use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_CONTINUOUS_SUFFIX: &str = "_CC";
pub const DEFAULT_EXAM_SUFFIX: &str = "_Ex";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationKind {
    #[serde(rename = "CC")]
    ContinuousAssessment,
    #[serde(rename = "EF")]
    FinalExam,
}

impl EvaluationKind {
    /// Well-known code of the matching `evaluation_kinds` record.
    pub fn code(self) -> &'static str {
        match self {
            Self::ContinuousAssessment => "CC",
            Self::FinalExam => "EF",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub subject_code: String,
    pub subject_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EvaluationKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub column: String,
    pub subject_code: String,
    pub subject_name: String,
    pub kind: EvaluationKind,
}

/// Allow-list of importable columns. Columns absent from the catalog are
/// ignored by the import, never rejected.
#[derive(Debug, Clone)]
pub struct SubjectCatalog {
    columns: HashMap<String, CatalogEntry>,
    continuous_suffix: String,
    exam_suffix: String,
}

impl SubjectCatalog {
    pub fn new(columns: HashMap<String, CatalogEntry>) -> Self {
        Self {
            columns,
            continuous_suffix: DEFAULT_CONTINUOUS_SUFFIX.to_string(),
            exam_suffix: DEFAULT_EXAM_SUFFIX.to_string(),
        }
    }

    pub fn with_suffixes(mut self, continuous: &str, exam: &str) -> Self {
        self.continuous_suffix = continuous.to_string();
        self.exam_suffix = exam.to_string();
        self
    }

    pub fn columns(&self) -> &HashMap<String, CatalogEntry> {
        &self.columns
    }

    pub fn infer_kind(&self, column: &str) -> Option<EvaluationKind> {
        let lower = column.to_ascii_lowercase();
        if lower.ends_with(&self.continuous_suffix.to_ascii_lowercase()) {
            Some(EvaluationKind::ContinuousAssessment)
        } else if lower.ends_with(&self.exam_suffix.to_ascii_lowercase()) {
            Some(EvaluationKind::FinalExam)
        } else {
            None
        }
    }

    pub fn map_columns(&self, headers: &[String], identifier_column: &str) -> Vec<ColumnMapping> {
        let mut out = Vec::new();
        for h in headers {
            if h.eq_ignore_ascii_case(identifier_column) {
                continue;
            }
            let Some(entry) = self.columns.get(h.as_str()) else {
                continue;
            };
            let Some(kind) = entry.kind.or_else(|| self.infer_kind(h)) else {
                tracing::warn!(column = %h, "catalog column has no evaluation kind suffix; ignored");
                continue;
            };
            out.push(ColumnMapping {
                column: h.clone(),
                subject_code: entry.subject_code.clone(),
                subject_name: entry.subject_name.clone(),
                kind,
            });
        }
        out
    }
}

const DEFAULT_SUBJECTS: &[(&str, &str, &str)] = &[
    ("Droit", "droit", "Droit"),
    ("PEI", "pei", "Problèmes économiques internationaux"),
    ("Eco", "eco", "Économie générale"),
    ("Compta", "compta", "Comptabilité"),
    ("Stat", "stat", "Statistiques"),
    ("Math", "math", "Mathématiques"),
    ("Info", "info", "Informatique"),
    ("Anglais", "anglais", "Anglais"),
    ("Mgmt", "mgmt", "Management"),
];

impl Default for SubjectCatalog {
    fn default() -> Self {
        let mut columns = HashMap::new();
        for (prefix, code, name) in DEFAULT_SUBJECTS {
            for suffix in [DEFAULT_CONTINUOUS_SUFFIX, DEFAULT_EXAM_SUFFIX] {
                columns.insert(
                    format!("{prefix}{suffix}"),
                    CatalogEntry {
                        subject_code: code.to_string(),
                        subject_name: name.to_string(),
                        kind: None,
                    },
                );
            }
        }
        Self::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(hs: &[&str]) -> Vec<String> {
        hs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unknown_columns_produce_no_mapping() {
        let catalog = SubjectCatalog::default();
        let m = catalog.map_columns(&headers(&["matricule", "Droit_CC", "Unknown_X"]), "matricule");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].column, "Droit_CC");
        assert_eq!(m[0].subject_code, "droit");
        assert_eq!(m[0].kind, EvaluationKind::ContinuousAssessment);
    }

    #[test]
    fn exam_suffix_maps_to_final_exam_in_header_order() {
        let catalog = SubjectCatalog::default();
        let m = catalog.map_columns(&headers(&["PEI_Ex", "matricule", "Droit_CC"]), "matricule");
        let cols = m.iter().map(|c| c.column.as_str()).collect::<Vec<_>>();
        assert_eq!(cols, vec!["PEI_Ex", "Droit_CC"]);
        assert_eq!(m[0].kind, EvaluationKind::FinalExam);
        assert_eq!(m[0].kind.code(), "EF");
    }

    #[test]
    fn injected_catalog_with_custom_suffixes() {
        let mut columns = HashMap::new();
        columns.insert(
            "Physique-partiel".to_string(),
            CatalogEntry {
                subject_code: "phy".into(),
                subject_name: "Physique".into(),
                kind: None,
            },
        );
        columns.insert(
            "Chimie".to_string(),
            CatalogEntry {
                subject_code: "chi".into(),
                subject_name: "Chimie".into(),
                kind: Some(EvaluationKind::FinalExam),
            },
        );
        columns.insert(
            "Bio".to_string(),
            CatalogEntry {
                subject_code: "bio".into(),
                subject_name: "Biologie".into(),
                kind: None,
            },
        );
        let catalog = SubjectCatalog::new(columns).with_suffixes("-partiel", "-final");
        let m = catalog.map_columns(&headers(&["Physique-partiel", "Chimie", "Bio", "Droit_CC"]), "id");
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].kind, EvaluationKind::ContinuousAssessment);
        assert_eq!(m[1].subject_code, "chi");
        assert_eq!(m[1].kind, EvaluationKind::FinalExam);
    }

    #[test]
    fn catalog_entry_kind_round_trips_through_json() {
        let e: CatalogEntry = serde_json::from_value(serde_json::json!({
            "subjectCode": "droit",
            "subjectName": "Droit",
            "kind": "EF"
        }))
        .expect("entry");
        assert_eq!(e.kind, Some(EvaluationKind::FinalExam));
    }
}
