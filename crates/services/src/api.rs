//! Contracts for the collaborators that live outside the session core.

use async_trait::async_trait;

use exam_core::model::{Exam, ExamId, ResultId, SubmissionRecord};

use crate::error::{ExamSourceError, SubmissionError};

/// Supplies exam metadata by identifier.
#[async_trait]
pub trait ExamSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `ExamSourceError` for any non-success response; callers treat it as fatal.
    async fn fetch_exam(&self, exam_id: ExamId) -> Result<Exam, ExamSourceError>;
}

/// Hands a finished attempt to the grading service.
///
/// May be slow and may fail; implementations must not retry on their own.
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// # Errors
    ///
    /// Returns `SubmissionError` if the grading service did not accept the record.
    async fn submit(&self, record: &SubmissionRecord) -> Result<ResultId, SubmissionError>;
}
