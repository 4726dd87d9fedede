use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_IDENTIFIER_COLUMN: &str = "matricule";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Numeric coercion: a field that parses fully as a finite float is a
    /// number, anything else stays text.
    pub fn coerce(raw: &str) -> Self {
        match raw.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// 1-based line in the source text.
    pub line_no: usize,
    pub student_no: String,
    pub values: HashMap<String, CellValue>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|f| f.is_empty())
}

/// Parses comma-delimited grade text. The first non-blank line is the
/// header; data lines with a different field count or an empty identifier
/// are dropped. Never fails: unreadable records are skipped.
pub fn parse_grade_csv(text: &str, identifier_column: &str) -> ParsedSheet {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut sheet = ParsedSheet::default();
    let mut id_col: Option<usize> = None;
    let mut have_header = false;

    for result in rdr.records() {
        let Ok(record) = result else {
            continue;
        };
        if is_blank(&record) {
            continue;
        }

        if !have_header {
            sheet.headers = record.iter().map(|s| s.to_string()).collect();
            id_col = sheet
                .headers
                .iter()
                .position(|h| h.eq_ignore_ascii_case(identifier_column));
            have_header = true;
            continue;
        }

        if record.len() != sheet.headers.len() {
            continue;
        }
        let Some(id_idx) = id_col else {
            continue;
        };
        let student_no = record.get(id_idx).unwrap_or("").to_string();
        if student_no.is_empty() {
            continue;
        }

        let values = sheet
            .headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .map(|(_, (h, v))| (h.clone(), CellValue::coerce(v)))
            .collect();

        sheet.rows.push(Row {
            line_no: record.position().map(|p| p.line() as usize).unwrap_or(0),
            student_no,
            values,
        });
    }

    sheet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_numeric_coercion() {
        let sheet = parse_grade_csv(
            "matricule,Droit_CC,PEI_Ex\nE001,14.5,Absent\nE002,12,9\n",
            DEFAULT_IDENTIFIER_COLUMN,
        );
        assert_eq!(sheet.headers, vec!["matricule", "Droit_CC", "PEI_Ex"]);
        assert_eq!(sheet.rows.len(), 2);

        let r0 = &sheet.rows[0];
        assert_eq!(r0.student_no, "E001");
        assert_eq!(r0.line_no, 2);
        assert_eq!(r0.values.get("Droit_CC"), Some(&CellValue::Number(14.5)));
        assert_eq!(
            r0.values.get("PEI_Ex"),
            Some(&CellValue::Text("Absent".into()))
        );
        assert!(!r0.values.contains_key("matricule"));
    }

    #[test]
    fn drops_short_lines_and_empty_identifiers() {
        let sheet = parse_grade_csv("matricule,Droit_CC\nE001,15\nE002\n,12\n", "matricule");
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].student_no, "E001");
    }

    #[test]
    fn drops_lines_with_extra_fields() {
        let sheet = parse_grade_csv("matricule,Droit_CC\nE1,15,99\nE2,11\n", "matricule");
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].student_no, "E2");
        assert_eq!(sheet.rows[0].line_no, 3);
    }

    #[test]
    fn skips_blank_lines_and_matches_identifier_case_insensitively() {
        let sheet = parse_grade_csv(
            "\n\nMATRICULE , Droit_CC\n\n  E7 , 11 \n   \n",
            "matricule",
        );
        assert_eq!(sheet.headers, vec!["MATRICULE", "Droit_CC"]);
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0].student_no, "E7");
        assert_eq!(
            sheet.rows[0].values.get("Droit_CC"),
            Some(&CellValue::Number(11.0))
        );
    }

    #[test]
    fn missing_identifier_column_yields_no_rows() {
        let sheet = parse_grade_csv("id,Droit_CC\nE1,10\n", "matricule");
        assert_eq!(sheet.headers.len(), 2);
        assert!(sheet.rows.is_empty());
    }

    #[test]
    fn quoted_fields_keep_embedded_commas() {
        let sheet = parse_grade_csv("matricule,Note\n\"E1\",\"12,5\"\n", "matricule");
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(
            sheet.rows[0].values.get("Note"),
            Some(&CellValue::Text("12,5".into()))
        );
    }

    #[test]
    fn non_finite_words_stay_text() {
        assert_eq!(CellValue::coerce("NaN"), CellValue::Text("NaN".into()));
        assert_eq!(CellValue::coerce("inf"), CellValue::Text("inf".into()));
        assert_eq!(CellValue::coerce("-1"), CellValue::Number(-1.0));
    }

    #[test]
    fn empty_input_has_no_header() {
        let sheet = parse_grade_csv("", "matricule");
        assert!(sheet.headers.is_empty());
        assert!(sheet.rows.is_empty());
    }
}
