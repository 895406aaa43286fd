use crate::error::GradeError;
use crate::models::{ConsolidatedStudentDocument, FlatGradeRow, StudentRecord};

#[cfg(test)]
pub mod memory;

/// The parameterized statements the query manager issues against the
/// wide-column layout: a flat table partitioned by (dep_code, semester) and
/// a consolidated table partitioned by dep_code. Partition reads return rows
/// in student_id order.
#[allow(async_fn_in_trait)]
pub trait GradeStore {
    async fn upsert_grade(&self, record: &StudentRecord) -> Result<(), GradeError>;

    async fn semester_rows(
        &self,
        dep_code: &str,
        semester: &str,
    ) -> Result<Vec<FlatGradeRow>, GradeError>;

    async fn grade_of(
        &self,
        dep_code: &str,
        semester: &str,
        student_id: &str,
    ) -> Result<Option<f64>, GradeError>;

    async fn upsert_document(&self, document: &ConsolidatedStudentDocument)
        -> Result<(), GradeError>;

    async fn department_documents(
        &self,
        dep_code: &str,
    ) -> Result<Vec<ConsolidatedStudentDocument>, GradeError>;

    async fn truncate_grades(&self) -> Result<(), GradeError>;

    /// Returns the number of rows matched; zero is not an error.
    async fn rename_student(
        &self,
        dep_code: &str,
        semester: &str,
        student_id: &str,
        student_name: &str,
    ) -> Result<u64, GradeError>;

    async fn close(self);
}
