use std::path::PathBuf;

use thiserror::Error;

/// Flat discriminant used when failures are collected instead of raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotConnected,
    MalformedKey,
    UnknownStudent,
    UnparsableEnrollment,
    StoreOperationFailed,
    MissingField,
    MissingColumn,
    Workbook,
    Metadata,
    InvalidKeyspace,
}

#[derive(Error, Debug)]
pub enum GradeError {
    #[error("store is not connected")]
    NotConnected(#[source] Option<sqlx::Error>),

    #[error("malformed student id {student_id:?}: {reason}")]
    MalformedKey {
        student_id: String,
        reason: &'static str,
    },

    #[error("student {student_id} is not in the directory")]
    UnknownStudent { student_id: String },

    #[error("no department boundary in enrollment text for {student_id}: {text:?}")]
    UnparsableEnrollment { student_id: String, text: String },

    #[error("store operation failed for {key}")]
    StoreOperationFailed {
        key: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("row {key} is missing {field}")]
    MissingField { key: String, field: &'static str },

    #[error("sheet {sheet} has no {column} column")]
    MissingColumn { sheet: String, column: &'static str },

    #[error("cannot read sheet {sheet}: {message}")]
    Workbook { sheet: String, message: String },

    #[error("metadata document {}: {message}", .path.display())]
    Metadata { path: PathBuf, message: String },

    #[error("invalid keyspace name {0:?}")]
    InvalidKeyspace(String),
}

impl GradeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GradeError::NotConnected(_) => ErrorKind::NotConnected,
            GradeError::MalformedKey { .. } => ErrorKind::MalformedKey,
            GradeError::UnknownStudent { .. } => ErrorKind::UnknownStudent,
            GradeError::UnparsableEnrollment { .. } => ErrorKind::UnparsableEnrollment,
            GradeError::StoreOperationFailed { .. } => ErrorKind::StoreOperationFailed,
            GradeError::MissingField { .. } => ErrorKind::MissingField,
            GradeError::MissingColumn { .. } => ErrorKind::MissingColumn,
            GradeError::Workbook { .. } => ErrorKind::Workbook,
            GradeError::Metadata { .. } => ErrorKind::Metadata,
            GradeError::InvalidKeyspace(_) => ErrorKind::InvalidKeyspace,
        }
    }

    pub fn store(key: impl Into<String>, source: sqlx::Error) -> Self {
        GradeError::StoreOperationFailed {
            key: key.into(),
            source,
        }
    }

    pub fn metadata(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        GradeError::Metadata {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
