use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ErrorKind, GradeError};

/// One spreadsheet row tagged with the sheet (semester) it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SemesterGradeRow {
    pub student_id: Option<String>,
    pub student_name: Option<String>,
    pub grade: Option<f64>,
    pub semester: String,
}

/// A row with its synthetic keys derived, ready for the flat table.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_id: String,
    pub student_name: Option<String>,
    pub department_code: String,
    pub registration_year: i32,
    pub grade: f64,
    pub semester: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedStudentDocument {
    pub student_id: String,
    pub student_name: String,
    pub department_code: String,
    pub registration_year: i32,
    pub semester_grades: BTreeMap<String, f64>,
}

/// A flat-table row as the store hands it back.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatGradeRow {
    pub student_id: String,
    pub student_name: Option<String>,
    pub grade: Option<f64>,
    pub registration_year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedGrade {
    pub student_id: String,
    pub student_name: Option<String>,
    pub grade: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemesterRankedGrade {
    pub student_id: String,
    pub student_name: String,
    pub grade: f64,
    pub semester: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl RowFailure {
    pub fn from_error(key: impl Into<String>, err: &GradeError) -> Self {
        RowFailure {
            key: key.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsertReport {
    pub attempted: usize,
    pub inserted: usize,
    pub failures: Vec<RowFailure>,
    pub elapsed: Duration,
}

impl InsertReport {
    pub fn record_failure(&mut self, failure: RowFailure) {
        tracing::warn!(
            key = %failure.key,
            kind = ?failure.kind,
            "{}",
            failure.message
        );
        self.failures.push(failure);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenameReport {
    pub statements: usize,
    pub rows_matched: u64,
    pub failures: Vec<RowFailure>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub parsed: usize,
    pub failures: Vec<RowFailure>,
}
