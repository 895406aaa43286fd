use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::GradeError;
use crate::models::{ConsolidatedStudentDocument, FlatGradeRow, StudentRecord};
use crate::store::GradeStore;

type FlatKey = (String, String, String);

/// Keeps both tables in ordered maps so partition scans come back in
/// clustering order. Reads, or writes for chosen student ids, can be made to
/// fail like a broken statement would.
#[derive(Default)]
pub struct MemoryStore {
    pub flat: Mutex<BTreeMap<FlatKey, FlatGradeRow>>,
    pub consolidated: Mutex<BTreeMap<(String, String), ConsolidatedStudentDocument>>,
    failing_reads: AtomicBool,
    failing_ids: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn fail_reads(&self) {
        self.failing_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes_for(&self, student_id: &str) {
        self.failing_ids
            .lock()
            .expect("failing ids")
            .insert(student_id.to_string());
    }

    fn check_read(&self, key: &str) -> Result<(), GradeError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(GradeError::store(
                key,
                sqlx::Error::ColumnNotFound("gpa".to_string()),
            ));
        }
        Ok(())
    }

    fn check_write(&self, student_id: &str) -> Result<(), GradeError> {
        if self.failing_ids.lock().expect("failing ids").contains(student_id) {
            return Err(GradeError::store(
                student_id,
                sqlx::Error::Protocol("write rejected".to_string()),
            ));
        }
        Ok(())
    }

    pub fn put_row(&self, dep_code: &str, semester: &str, row: FlatGradeRow) {
        let key = (dep_code.to_string(), semester.to_string(), row.student_id.clone());
        self.flat.lock().expect("flat table").insert(key, row);
    }

    pub fn flat_snapshot(&self) -> BTreeMap<FlatKey, FlatGradeRow> {
        self.flat.lock().expect("flat table").clone()
    }
}

impl GradeStore for MemoryStore {
    async fn upsert_grade(&self, record: &StudentRecord) -> Result<(), GradeError> {
        self.check_write(&record.student_id)?;
        self.put_row(
            &record.department_code,
            &record.semester,
            FlatGradeRow {
                student_id: record.student_id.clone(),
                student_name: record.student_name.clone(),
                grade: Some(record.grade),
                registration_year: Some(record.registration_year),
            },
        );
        Ok(())
    }

    async fn semester_rows(
        &self,
        dep_code: &str,
        semester: &str,
    ) -> Result<Vec<FlatGradeRow>, GradeError> {
        self.check_read(dep_code)?;
        let flat = self.flat.lock().expect("flat table");
        Ok(flat
            .iter()
            .filter(|((dep, sem, _), _)| dep == dep_code && sem == semester)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn grade_of(
        &self,
        dep_code: &str,
        semester: &str,
        student_id: &str,
    ) -> Result<Option<f64>, GradeError> {
        self.check_read(student_id)?;
        let key = (dep_code.to_string(), semester.to_string(), student_id.to_string());
        let flat = self.flat.lock().expect("flat table");
        Ok(flat.get(&key).and_then(|row| row.grade))
    }

    async fn upsert_document(
        &self,
        document: &ConsolidatedStudentDocument,
    ) -> Result<(), GradeError> {
        self.check_write(&document.student_id)?;
        let key = (document.department_code.clone(), document.student_id.clone());
        self.consolidated
            .lock()
            .expect("consolidated table")
            .insert(key, document.clone());
        Ok(())
    }

    async fn department_documents(
        &self,
        dep_code: &str,
    ) -> Result<Vec<ConsolidatedStudentDocument>, GradeError> {
        self.check_read(dep_code)?;
        let consolidated = self.consolidated.lock().expect("consolidated table");
        Ok(consolidated
            .iter()
            .filter(|((dep, _), _)| dep == dep_code)
            .map(|(_, document)| document.clone())
            .collect())
    }

    async fn truncate_grades(&self) -> Result<(), GradeError> {
        self.flat.lock().expect("flat table").clear();
        Ok(())
    }

    async fn rename_student(
        &self,
        dep_code: &str,
        semester: &str,
        student_id: &str,
        student_name: &str,
    ) -> Result<u64, GradeError> {
        self.check_write(student_id)?;
        let key = (dep_code.to_string(), semester.to_string(), student_id.to_string());
        let mut flat = self.flat.lock().expect("flat table");
        match flat.get_mut(&key) {
            Some(row) => {
                row.student_name = Some(student_name.to_string());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn close(self) {}
}
