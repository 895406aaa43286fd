use std::time::Instant;

use crate::directory::Directory;
use crate::error::GradeError;
use crate::ingest::fold_documents;
use crate::models::{
    InsertReport, RankedGrade, RenameReport, RowFailure, SemesterGradeRow, SemesterRankedGrade,
    StudentRecord,
};
use crate::ranking::{rank_department, rank_semester};
use crate::store::GradeStore;

/// Owns the store session and the loaded directory. Once closed, every
/// operation fails with `NotConnected`.
pub struct QueryManager<S: GradeStore> {
    session: Option<S>,
    directory: Directory,
}

impl<S: GradeStore> QueryManager<S> {
    pub fn new(store: S, directory: Directory) -> Self {
        QueryManager {
            session: Some(store),
            directory,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    fn session(&self) -> Result<&S, GradeError> {
        self.session.as_ref().ok_or(GradeError::NotConnected(None))
    }

    pub async fn close(&mut self) {
        if let Some(store) = self.session.take() {
            store.close().await;
            tracing::debug!("session closed");
        }
    }

    /// One upsert per row into the flat table. Rows that cannot be keyed or
    /// written are reported, never fatal.
    pub async fn insert_flat(&self, rows: &[SemesterGradeRow]) -> Result<InsertReport, GradeError> {
        let store = self.session()?;
        let started = Instant::now();
        let mut report = InsertReport {
            attempted: rows.len(),
            ..InsertReport::default()
        };

        for row in rows {
            let mut record = match StudentRecord::from_row(row) {
                Ok(record) => record,
                Err(err) => {
                    let key = row.student_id.clone().unwrap_or_default();
                    report.record_failure(RowFailure::from_error(key, &err));
                    continue;
                }
            };
            if record.student_name.is_none() {
                record.student_name = self
                    .directory
                    .student(&record.student_id)
                    .map(|info| info.name.clone());
            }

            if let Err(err) = store.upsert_grade(&record).await {
                report.record_failure(RowFailure::from_error(&record.student_id, &err));
            }
        }

        report.inserted = report.attempted - report.failures.len();
        report.elapsed = started.elapsed();
        tracing::info!(
            attempted = report.attempted,
            inserted = report.inserted,
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "flat insert finished"
        );
        Ok(report)
    }

    /// Folds all semesters per student, then one upsert per student into the
    /// consolidated table.
    pub async fn insert_consolidated(
        &self,
        rows: &[SemesterGradeRow],
    ) -> Result<InsertReport, GradeError> {
        let store = self.session()?;
        let started = Instant::now();
        let (documents, fold_failures) = fold_documents(rows, &self.directory);

        let mut report = InsertReport {
            attempted: documents.len() + fold_failures.len(),
            ..InsertReport::default()
        };
        for failure in fold_failures {
            report.record_failure(failure);
        }

        for document in &documents {
            if let Err(err) = store.upsert_document(document).await {
                report.record_failure(RowFailure::from_error(&document.student_id, &err));
            }
        }

        report.inserted = report.attempted - report.failures.len();
        report.elapsed = started.elapsed();
        tracing::info!(
            students = report.inserted,
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "consolidated insert finished"
        );
        Ok(report)
    }

    pub async fn select_semester(
        &self,
        dep_code: &str,
        semester: &str,
    ) -> Result<Vec<RankedGrade>, GradeError> {
        let store = self.session()?;
        match store.semester_rows(dep_code, semester).await {
            Ok(rows) => Ok(rank_semester(rows)),
            Err(err) => {
                tracing::warn!(dep_code, semester, kind = ?err.kind(), "{err}");
                Ok(Vec::new())
            }
        }
    }

    /// All semesters for a department, read from the consolidated table in
    /// one fetch.
    pub async fn select_department(
        &self,
        dep_code: &str,
    ) -> Result<Vec<SemesterRankedGrade>, GradeError> {
        let store = self.session()?;
        match store.department_documents(dep_code).await {
            Ok(documents) => Ok(rank_department(documents)),
            Err(err) => {
                tracing::warn!(dep_code, kind = ?err.kind(), "{err}");
                Ok(Vec::new())
            }
        }
    }

    pub async fn student_grade(
        &self,
        dep_code: &str,
        semester: &str,
        student_id: &str,
    ) -> Result<Option<f64>, GradeError> {
        let store = self.session()?;
        match store.grade_of(dep_code, semester, student_id).await {
            Ok(grade) => Ok(grade),
            Err(err) => {
                tracing::warn!(dep_code, semester, student_id, kind = ?err.kind(), "{err}");
                Ok(None)
            }
        }
    }

    /// Clears the flat table. Irreversible.
    pub async fn truncate(&self) -> Result<(), GradeError> {
        self.session()?.truncate_grades().await?;
        tracing::info!("flat grade table truncated");
        Ok(())
    }

    /// Rewrites the stored name of every directory student at each semester.
    /// A failed update is recorded and the batch carries on.
    pub async fn rename_students(&self) -> Result<RenameReport, GradeError> {
        let store = self.session()?;
        let mut report = RenameReport::default();

        for (student_id, info) in self.directory.students() {
            for semester in self.directory.semesters() {
                report.statements += 1;
                match store
                    .rename_student(&info.dep_code, semester, student_id, &info.name)
                    .await
                {
                    Ok(matched) => report.rows_matched += matched,
                    Err(err) => {
                        let key = format!("{student_id}/{semester}");
                        tracing::warn!(key = %key, kind = ?err.kind(), "{err}");
                        report.failures.push(RowFailure::from_error(key, &err));
                    }
                }
            }
        }

        tracing::info!(
            statements = report.statements,
            rows_matched = report.rows_matched,
            failed = report.failures.len(),
            "student names updated"
        );
        Ok(report)
    }
}
