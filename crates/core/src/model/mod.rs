mod exam;
mod ids;
mod session;
mod submission;

pub use ids::{ExamId, ParseIdError, QuestionId, ResultId};

pub use exam::{Exam, ExamError, Question};
pub use session::{
    RestoreReport, SessionFragment, SessionPhase, SessionState, SessionStateError,
};
pub use submission::{AnswerSlot, SubmissionRecord, SubmittedAnswer, UNANSWERED_SENTINEL};
