//! Spreadsheet rows to grade records: sheet sources, key derivation and the
//! per-student fold used by the consolidated table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};

use crate::directory::Directory;
use crate::error::GradeError;
use crate::models::{ConsolidatedStudentDocument, RowFailure, SemesterGradeRow, StudentRecord};

const STUDENT_ID_COLUMN: &str = "student_id";
const GRADE_COLUMN: &str = "gpa";
const NAME_COLUMN: &str = "student_name";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Text cells keep their characters; numbers are only read out of them
    /// on demand so long identifiers never pass through a float.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    /// String form of an identifier cell; whole floats lose their ".0".
    pub fn as_key(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(format!("{:.0}", f)),
            Cell::Float(f) => Some(f.to_string()),
            Cell::Text(s) if s.trim().is_empty() => None,
            Cell::Text(s) => Some(s.trim().to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if f.is_finite() => Some(*f),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Int(i) => Cell::Int(*i),
            Data::Float(f) => Cell::Float(*f),
            Data::String(s) => Cell::from_text(s),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::DateTime(dt) => Cell::Float(dt.as_f64()),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl SheetTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }
}

/// Anything that can hand back the rows of a sheet by name.
pub trait SheetSource {
    fn read_sheet(&mut self, sheet: &str) -> Result<SheetTable, GradeError>;
}

/// An `.xlsx`/`.xls`/`.ods` workbook with one sheet per semester.
pub struct Workbook {
    sheets: Sheets<std::io::BufReader<std::fs::File>>,
}

impl Workbook {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GradeError> {
        let path = path.as_ref();
        let sheets = open_workbook_auto(path).map_err(|e| GradeError::Workbook {
            sheet: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Workbook { sheets })
    }
}

impl SheetSource for Workbook {
    fn read_sheet(&mut self, sheet: &str) -> Result<SheetTable, GradeError> {
        let range = self
            .sheets
            .worksheet_range(sheet)
            .map_err(|e| GradeError::Workbook {
                sheet: sheet.to_string(),
                message: e.to_string(),
            })?;

        Ok(table_from_range(&range))
    }
}

/// First row is the header; the rest are data rows.
pub fn table_from_range(range: &Range<Data>) -> SheetTable {
    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .map(|header| {
            header
                .iter()
                .map(|cell| Cell::from(cell).as_key().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    let rows = rows.map(|row| row.iter().map(Cell::from).collect()).collect();

    SheetTable { headers, rows }
}

/// A directory of CSV exports named `<semester>.csv`.
pub struct CsvSheets {
    dir: PathBuf,
}

impl CsvSheets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CsvSheets { dir: dir.into() }
    }
}

impl SheetSource for CsvSheets {
    fn read_sheet(&mut self, sheet: &str) -> Result<SheetTable, GradeError> {
        let path = self.dir.join(format!("{sheet}.csv"));
        let workbook_error = |e: csv::Error| GradeError::Workbook {
            sheet: sheet.to_string(),
            message: e.to_string(),
        };

        let mut reader = csv::Reader::from_path(&path).map_err(workbook_error)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(workbook_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(workbook_error)?;
            rows.push(record.iter().map(Cell::from_text).collect());
        }

        Ok(SheetTable { headers, rows })
    }
}

/// Raw scores are stored as hundredths (350 -> 3.50).
pub fn normalize_grade(raw: f64) -> f64 {
    raw / 100.0
}

/// Splits a student id into (registration year, department code).
pub fn derive_keys(student_id: &str) -> Result<(i32, String), GradeError> {
    let malformed = |reason| GradeError::MalformedKey {
        student_id: student_id.to_string(),
        reason,
    };

    let chars: Vec<char> = student_id.chars().collect();
    if chars.len() < 8 {
        return Err(malformed("shorter than 8 characters"));
    }

    if !chars[..4].iter().all(char::is_ascii_digit) {
        return Err(malformed("registration year prefix is not numeric"));
    }
    let year: String = chars[..4].iter().collect();
    let registration_year = year
        .parse::<i32>()
        .map_err(|_| malformed("registration year prefix is not numeric"))?;
    let department_code = chars[4..8].iter().collect();

    Ok((registration_year, department_code))
}

/// Reads every semester's sheet in order and concatenates the rows, each
/// tagged with its semester label.
pub fn read_semester_rows<S: SheetSource>(
    source: &mut S,
    semesters: &[String],
) -> Result<Vec<SemesterGradeRow>, GradeError> {
    let mut out = Vec::new();

    for semester in semesters {
        let table = source.read_sheet(semester)?;
        let id_col = table
            .column(STUDENT_ID_COLUMN)
            .ok_or_else(|| GradeError::MissingColumn {
                sheet: semester.clone(),
                column: STUDENT_ID_COLUMN,
            })?;
        let grade_col = table
            .column(GRADE_COLUMN)
            .ok_or_else(|| GradeError::MissingColumn {
                sheet: semester.clone(),
                column: GRADE_COLUMN,
            })?;
        let name_col = table.column(NAME_COLUMN);

        let before = out.len();
        for row in &table.rows {
            let cell = |idx: usize| row.get(idx).unwrap_or(&Cell::Empty);
            if row.iter().all(|c| *c == Cell::Empty) {
                continue;
            }
            out.push(SemesterGradeRow {
                student_id: cell(id_col).as_key(),
                student_name: name_col.and_then(|idx| cell(idx).as_text()),
                grade: cell(grade_col).as_number().map(normalize_grade),
                semester: semester.clone(),
            });
        }
        tracing::debug!(semester = %semester, rows = out.len() - before, "sheet read");
    }

    Ok(out)
}

fn row_key(row: &SemesterGradeRow) -> String {
    format!(
        "{}/{}",
        row.student_id.as_deref().unwrap_or("<no id>"),
        row.semester
    )
}

impl StudentRecord {
    pub fn from_row(row: &SemesterGradeRow) -> Result<StudentRecord, GradeError> {
        let student_id = row.student_id.clone().ok_or_else(|| GradeError::MissingField {
            key: row_key(row),
            field: STUDENT_ID_COLUMN,
        })?;
        let grade = row.grade.ok_or_else(|| GradeError::MissingField {
            key: row_key(row),
            field: GRADE_COLUMN,
        })?;
        let (registration_year, department_code) = derive_keys(&student_id)?;

        Ok(StudentRecord {
            student_id,
            student_name: row.student_name.clone(),
            department_code,
            registration_year,
            grade,
            semester: row.semester.clone(),
        })
    }
}

/// Folds per-semester rows into one document per student. Rows that cannot
/// be keyed and students missing from the directory come back as failures.
pub fn fold_documents(
    rows: &[SemesterGradeRow],
    directory: &Directory,
) -> (Vec<ConsolidatedStudentDocument>, Vec<RowFailure>) {
    let mut documents: BTreeMap<String, ConsolidatedStudentDocument> = BTreeMap::new();
    let mut failures = Vec::new();

    for row in rows {
        let record = match StudentRecord::from_row(row) {
            Ok(record) => record,
            Err(err) => {
                failures.push(RowFailure::from_error(row_key(row), &err));
                continue;
            }
        };

        if let Some(document) = documents.get_mut(&record.student_id) {
            document
                .semester_grades
                .insert(record.semester, record.grade);
            continue;
        }

        let Some(info) = directory.student(&record.student_id) else {
            let err = GradeError::UnknownStudent {
                student_id: record.student_id.clone(),
            };
            failures.push(RowFailure::from_error(row_key(row), &err));
            continue;
        };

        documents.insert(
            record.student_id.clone(),
            ConsolidatedStudentDocument {
                student_id: record.student_id,
                student_name: info.name.clone(),
                department_code: record.department_code,
                registration_year: record.registration_year,
                semester_grades: BTreeMap::from([(record.semester, record.grade)]),
            },
        );
    }

    (documents.into_values().collect(), failures)
}
