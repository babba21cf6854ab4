#![forbid(unsafe_code)]

pub mod api;
pub mod error;
pub mod http;
pub mod sessions;

pub use exam_core::Clock;

pub use api::{ExamSource, SubmissionClient};
pub use error::{ConfigError, ExamSourceError, SessionError, SubmissionError};
pub use http::{ExamApiConfig, HttpExamApi};
pub use sessions::{
    SessionCommand, SessionController, SessionHandle, SessionRunner, SessionSnapshot,
    SubmitOutcome, SubmitPrompt, TickOutcome,
};
