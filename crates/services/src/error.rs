//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{ExamError, ExamId, SessionPhase, SessionStateError};
use storage::repository::StorageError;

/// Errors emitted while fetching exam metadata.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamSourceError {
    #[error("exam {0} not found")]
    NotFound(ExamId),
    #[error("exam request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("exam payload is invalid: {0}")]
    InvalidExam(#[from] ExamError),
}

/// Errors emitted by a `SubmissionClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("submission failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// Errors emitted by the session controller and runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("failed to load exam: {0}")]
    Load(#[from] ExamSourceError),
    #[error(transparent)]
    Validation(#[from] SessionStateError),
    #[error("`{operation}` is not allowed while the session is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: SessionPhase,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("session runner has stopped")]
    Closed,
}

/// Errors emitted while reading service configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid exam API url `{raw}`: {source}")]
    InvalidUrl {
        raw: String,
        #[source]
        source: url::ParseError,
    },
    #[error("exam API url `{0}` cannot be used as a base")]
    NotABase(String),
}
