use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;

use crate::error::GradeError;
use crate::models::{ConsolidatedStudentDocument, FlatGradeRow, StudentRecord};
use crate::store::GradeStore;

/// Postgres-backed store; the keyspace is a schema holding `gpa_table` and
/// `student_grades`.
pub struct PgGradeStore {
    pool: PgPool,
    keyspace: String,
}

pub fn validate_keyspace(keyspace: &str) -> Result<(), GradeError> {
    let mut chars = keyspace.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GradeError::InvalidKeyspace(keyspace.to_string()))
    }
}

impl PgGradeStore {
    pub async fn connect(database_url: &str, keyspace: &str) -> Result<Self, GradeError> {
        validate_keyspace(keyspace)?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|e| GradeError::NotConnected(Some(e)))?;
        tracing::info!(keyspace, "session is ready");
        Ok(PgGradeStore {
            pool,
            keyspace: keyspace.to_string(),
        })
    }

    pub async fn init_schema(&self) -> Result<(), GradeError> {
        let ks = &self.keyspace;
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {ks}"),
            format!(
                "CREATE TABLE IF NOT EXISTS {ks}.gpa_table (
                    dep_code TEXT NOT NULL,
                    semester TEXT NOT NULL,
                    student_id TEXT NOT NULL,
                    gpa DOUBLE PRECISION,
                    reg_year INTEGER,
                    student_name TEXT,
                    PRIMARY KEY (dep_code, semester, student_id)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {ks}.student_grades (
                    dep_code TEXT NOT NULL,
                    student_id TEXT NOT NULL,
                    student_name TEXT NOT NULL,
                    reg_year INTEGER NOT NULL,
                    semester_grades JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    PRIMARY KEY (dep_code, student_id)
                )"
            ),
        ];

        for statement in statements {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| GradeError::store(format!("schema {ks}"), e))?;
        }
        Ok(())
    }
}

/// The JSONB column must be an object of semester label to number.
pub fn decode_semester_grades(
    value: serde_json::Value,
) -> Result<BTreeMap<String, f64>, sqlx::Error> {
    serde_json::from_value(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl GradeStore for PgGradeStore {
    async fn upsert_grade(&self, record: &StudentRecord) -> Result<(), GradeError> {
        let ks = &self.keyspace;
        let query = format!(
            r#"
            INSERT INTO {ks}.gpa_table
            (dep_code, semester, student_id, gpa, reg_year, student_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (dep_code, semester, student_id) DO UPDATE
            SET gpa = EXCLUDED.gpa,
                reg_year = EXCLUDED.reg_year,
                student_name = COALESCE(EXCLUDED.student_name, {ks}.gpa_table.student_name)
            "#
        );

        sqlx::query(&query)
            .bind(&record.department_code)
            .bind(&record.semester)
            .bind(&record.student_id)
            .bind(record.grade)
            .bind(record.registration_year)
            .bind(record.student_name.as_deref())
            .execute(&self.pool)
            .await
            .map_err(|e| GradeError::store(&record.student_id, e))?;
        Ok(())
    }

    async fn semester_rows(
        &self,
        dep_code: &str,
        semester: &str,
    ) -> Result<Vec<FlatGradeRow>, GradeError> {
        let query = format!(
            "SELECT student_id, student_name, gpa, reg_year FROM {}.gpa_table \
             WHERE dep_code = $1 AND semester = $2 ORDER BY student_id",
            self.keyspace
        );

        let records = sqlx::query(&query)
            .bind(dep_code)
            .bind(semester)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GradeError::store(format!("{dep_code}/{semester}"), e))?;

        let key = format!("{dep_code}/{semester}");
        let mut rows = Vec::with_capacity(records.len());
        for row in records {
            let decode = || -> Result<FlatGradeRow, sqlx::Error> {
                Ok(FlatGradeRow {
                    student_id: row.try_get("student_id")?,
                    student_name: row.try_get("student_name")?,
                    grade: row.try_get("gpa")?,
                    registration_year: row.try_get("reg_year")?,
                })
            };
            rows.push(decode().map_err(|e| GradeError::store(&key, e))?);
        }
        Ok(rows)
    }

    async fn grade_of(
        &self,
        dep_code: &str,
        semester: &str,
        student_id: &str,
    ) -> Result<Option<f64>, GradeError> {
        let query = format!(
            "SELECT gpa FROM {}.gpa_table \
             WHERE dep_code = $1 AND semester = $2 AND student_id = $3",
            self.keyspace
        );

        let row = sqlx::query(&query)
            .bind(dep_code)
            .bind(semester)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GradeError::store(student_id, e))?;
        match row {
            Some(row) => row
                .try_get::<Option<f64>, _>("gpa")
                .map_err(|e| GradeError::store(student_id, e)),
            None => Ok(None),
        }
    }

    async fn upsert_document(
        &self,
        document: &ConsolidatedStudentDocument,
    ) -> Result<(), GradeError> {
        let query = format!(
            r#"
            INSERT INTO {}.student_grades
            (dep_code, student_id, student_name, reg_year, semester_grades)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (dep_code, student_id) DO UPDATE
            SET student_name = EXCLUDED.student_name,
                reg_year = EXCLUDED.reg_year,
                semester_grades = EXCLUDED.semester_grades
            "#,
            self.keyspace
        );

        sqlx::query(&query)
            .bind(&document.department_code)
            .bind(&document.student_id)
            .bind(&document.student_name)
            .bind(document.registration_year)
            .bind(Json(&document.semester_grades))
            .execute(&self.pool)
            .await
            .map_err(|e| GradeError::store(&document.student_id, e))?;
        Ok(())
    }

    async fn department_documents(
        &self,
        dep_code: &str,
    ) -> Result<Vec<ConsolidatedStudentDocument>, GradeError> {
        let query = format!(
            "SELECT student_id, student_name, reg_year, semester_grades \
             FROM {}.student_grades WHERE dep_code = $1 ORDER BY student_id",
            self.keyspace
        );

        let records = sqlx::query(&query)
            .bind(dep_code)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GradeError::store(dep_code, e))?;

        let mut documents = Vec::with_capacity(records.len());
        for row in records {
            let decode = || -> Result<ConsolidatedStudentDocument, sqlx::Error> {
                let Json(grades): Json<serde_json::Value> = row.try_get("semester_grades")?;
                Ok(ConsolidatedStudentDocument {
                    student_id: row.try_get("student_id")?,
                    student_name: row.try_get("student_name")?,
                    department_code: dep_code.to_string(),
                    registration_year: row.try_get("reg_year")?,
                    semester_grades: decode_semester_grades(grades)?,
                })
            };
            documents.push(decode().map_err(|e| GradeError::store(dep_code, e))?);
        }
        Ok(documents)
    }

    async fn truncate_grades(&self) -> Result<(), GradeError> {
        let query = format!("TRUNCATE {}.gpa_table", self.keyspace);
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| GradeError::store("gpa_table", e))?;
        Ok(())
    }

    async fn rename_student(
        &self,
        dep_code: &str,
        semester: &str,
        student_id: &str,
        student_name: &str,
    ) -> Result<u64, GradeError> {
        let query = format!(
            "UPDATE {}.gpa_table SET student_name = $1 \
             WHERE dep_code = $2 AND semester = $3 AND student_id = $4",
            self.keyspace
        );

        let result = sqlx::query(&query)
            .bind(student_name)
            .bind(dep_code)
            .bind(semester)
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(|e| GradeError::store(student_id, e))?;
        Ok(result.rows_affected())
    }

    async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn keyspace_must_be_a_plain_identifier() {
        assert!(validate_keyspace("test_keyspace").is_ok());
        assert!(validate_keyspace("_grades2").is_ok());
        for bad in ["", "2grades", "grades; DROP", "a.b", "ks-1"] {
            let err = validate_keyspace(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidKeyspace);
        }
    }

    #[test]
    fn semester_grades_decode_from_a_number_map() {
        let grades = decode_semester_grades(json!({"19fall": 3.5, "20spring": 2})).expect("decode");
        assert_eq!(grades["19fall"], 3.5);
        assert_eq!(grades["20spring"], 2.0);
    }

    #[test]
    fn malformed_semester_grades_are_store_failures() {
        for bad in [json!({"19fall": null}), json!([3.5]), json!({"19fall": "A"})] {
            let err = decode_semester_grades(bad).unwrap_err();
            let err = GradeError::store("0602", err);
            assert_eq!(err.kind(), ErrorKind::StoreOperationFailed);
        }
    }
}
